//! Entity model for members, teams and their projections.
//!
//! # Responsibility
//! - Define the persistent shapes (`Member`, `Team`) and their table mapping.
//! - Define read-only projections (`MemberDto`).
//!
//! # Invariants
//! - Identity is assigned by the store on first persist and never changes.
//! - `Member.team` is the authoritative side of the association.

pub mod audit;
pub mod dto;
pub mod entity;
pub mod member;
pub mod team;
