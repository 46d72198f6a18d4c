//! Reduction operators and the scalar trait collective payloads satisfy.
//!
//! The mesh layer never performs reduction arithmetic on behalf of a
//! real transport; [`ReduceElement`] exists so the in-process transport
//! (and any other pure-Rust backend) can fold contributions itself.
//! Payloads travel as raw bytes, so elements must be `Pod`.

use crate::comm::backend::BackendKind;
use crate::error::RankMeshError;
use bytemuck::Pod;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Reduction operator for all-reduce and reduce-scatter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReduceOp {
    Sum,
    Product,
    Min,
    Max,
    /// Bitwise AND; integer payloads only.
    BitAnd,
    /// Bitwise OR; integer payloads only.
    BitOr,
    /// Bitwise XOR; integer payloads only.
    BitXor,
}

impl fmt::Display for ReduceOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ReduceOp::Sum => "sum",
            ReduceOp::Product => "product",
            ReduceOp::Min => "min",
            ReduceOp::Max => "max",
            ReduceOp::BitAnd => "band",
            ReduceOp::BitOr => "bor",
            ReduceOp::BitXor => "bxor",
        };
        write!(f, "{name}")
    }
}

/// Scalar that can ride a collective payload.
///
/// `combine` folds one incoming contribution into the local value; the
/// transport applies it pairwise in member order, so non-commutative
/// behavior would be observable and is not allowed by implementors.
pub trait ReduceElement: Pod + Send + Sync {
    fn combine(op: ReduceOp, local: Self, incoming: Self) -> Result<Self, RankMeshError>;
}

macro_rules! int_reduce_element {
    ($($t:ty),*) => {$(
        impl ReduceElement for $t {
            #[inline]
            fn combine(op: ReduceOp, local: Self, incoming: Self) -> Result<Self, RankMeshError> {
                Ok(match op {
                    ReduceOp::Sum => local.wrapping_add(incoming),
                    ReduceOp::Product => local.wrapping_mul(incoming),
                    ReduceOp::Min => local.min(incoming),
                    ReduceOp::Max => local.max(incoming),
                    ReduceOp::BitAnd => local & incoming,
                    ReduceOp::BitOr => local | incoming,
                    ReduceOp::BitXor => local ^ incoming,
                })
            }
        }
    )*};
}

int_reduce_element!(u8, u32, u64, i32, i64);

macro_rules! float_reduce_element {
    ($($t:ty),*) => {$(
        impl ReduceElement for $t {
            #[inline]
            fn combine(op: ReduceOp, local: Self, incoming: Self) -> Result<Self, RankMeshError> {
                match op {
                    ReduceOp::Sum => Ok(local + incoming),
                    ReduceOp::Product => Ok(local * incoming),
                    ReduceOp::Min => Ok(local.min(incoming)),
                    ReduceOp::Max => Ok(local.max(incoming)),
                    ReduceOp::BitAnd | ReduceOp::BitOr | ReduceOp::BitXor => {
                        Err(RankMeshError::ShapeMismatch {
                            context: format!("bitwise {op} is not defined for float payloads"),
                        })
                    }
                }
            }
        }
    )*};
}

float_reduce_element!(f32, f64);

/// Folds all contributions (in member order) into a single vector.
///
/// Used by pure-Rust transports; real accelerator backends reduce on
/// device and never call this.
pub fn fold_contributions<T: ReduceElement>(
    op: ReduceOp,
    contributions: &[Vec<T>],
    backend: BackendKind,
) -> Result<Vec<T>, RankMeshError> {
    let mut iter = contributions.iter();
    let first = iter.next().ok_or_else(|| RankMeshError::ShapeMismatch {
        context: format!("all-reduce on {backend} received no contributions"),
    })?;
    let mut acc = first.clone();
    for contribution in iter {
        if contribution.len() != acc.len() {
            return Err(RankMeshError::ShapeMismatch {
                context: format!(
                    "all-reduce on {backend}: contribution of {} elements, expected {}",
                    contribution.len(),
                    acc.len()
                ),
            });
        }
        for (local, &incoming) in acc.iter_mut().zip(contribution) {
            *local = T::combine(op, *local, incoming)?;
        }
    }
    Ok(acc)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_ops() {
        assert_eq!(u64::combine(ReduceOp::Sum, 3, 4).unwrap(), 7);
        assert_eq!(u64::combine(ReduceOp::Product, 3, 4).unwrap(), 12);
        assert_eq!(u64::combine(ReduceOp::Min, 3, 4).unwrap(), 3);
        assert_eq!(u64::combine(ReduceOp::Max, 3, 4).unwrap(), 4);
        assert_eq!(u64::combine(ReduceOp::BitAnd, 0b110, 0b011).unwrap(), 0b010);
        assert_eq!(u64::combine(ReduceOp::BitOr, 0b110, 0b011).unwrap(), 0b111);
        assert_eq!(u64::combine(ReduceOp::BitXor, 0b110, 0b011).unwrap(), 0b101);
    }

    #[test]
    fn float_bitwise_rejected() {
        assert!(f64::combine(ReduceOp::BitXor, 1.0, 2.0).is_err());
        assert_eq!(f64::combine(ReduceOp::Sum, 1.0, 2.0).unwrap(), 3.0);
    }

    #[test]
    fn fold_in_member_order() {
        let parts = vec![vec![1u32, 10], vec![2, 20], vec![3, 30]];
        let out = fold_contributions(ReduceOp::Sum, &parts, BackendKind::Loopback).unwrap();
        assert_eq!(out, vec![6, 60]);
    }

    #[test]
    fn fold_rejects_ragged_contributions() {
        let parts = vec![vec![1u32, 10], vec![2]];
        assert!(fold_contributions(ReduceOp::Sum, &parts, BackendKind::Loopback).is_err());
    }
}
