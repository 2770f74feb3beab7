//! MRO (Method Resolution Order) computation using C3 linearization.
//!
//! # C3 Linearization
//!
//! The C3 algorithm ensures:
//! 1. **Local Precedence Order**: A class comes before its parents
//! 2. **Monotonicity**: If A precedes B in one linearization, A precedes B everywhere
//! 3. **Extended Precedence Graph**: Respects parent ordering as declared
//!
//! # Example
//!
//! ```text
//! class A: pass
//! class B(A): pass
//! class C(A): pass
//! class D(B, C): pass
//!
//! MRO of D: [D, B, C, A, object]
//! ```
//!
//! The linearization works on [`TypeId`]s; the type object maps the result
//! back to type references. A parent's MRO is whatever that parent currently
//! resolves through, which may be a metaclass-supplied order that omits the
//! parent itself.

use super::TypeId;
use smallvec::SmallVec;
use thiserror::Error;

/// Error during MRO computation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MroError {
    /// C3 linearization failed: no ordering satisfies all constraints.
    #[error(
        "Cannot create a consistent method resolution order (MRO) for class '{class_name}'. \
         Conflicting classes: {conflicting:?}"
    )]
    InconsistentMro {
        /// Class that caused the failure.
        class_name: String,
        /// Conflicting classes that couldn't be ordered.
        conflicting: Vec<String>,
    },

    /// Duplicate base class detected.
    #[error("duplicate base class {duplicate} in class '{class_name}'")]
    DuplicateBase {
        /// Class being created.
        class_name: String,
        /// The repeated base.
        duplicate: String,
    },

    /// A class would become its own ancestor.
    #[error("a __bases__ item causes an inheritance cycle in class '{class_name}'")]
    InheritanceCycle {
        /// Class being mutated.
        class_name: String,
    },
}

impl From<MroError> for cinder_core::CinderError {
    fn from(err: MroError) -> Self {
        cinder_core::CinderError::type_error(err.to_string())
    }
}

/// Result type for MRO computation.
pub type MroResult<T> = Result<T, MroError>;

/// Stack-allocated MRO for typical class hierarchies.
pub type IdMro = SmallVec<[TypeId; 8]>;

/// Compute the C3 linearization (MRO) for a class.
///
/// # Arguments
///
/// * `class_id` - The class for which to compute the MRO
/// * `bases` - The direct base classes (in declaration order)
/// * `get_mro` - Function to get the MRO of a parent class
/// * `name_of` - Function naming a class for error messages
///
/// A class with no bases linearizes to itself alone; every other class
/// reaches the root through its bases.
pub fn compute_c3_mro<F, N>(
    class_id: TypeId,
    bases: &[TypeId],
    get_mro: F,
    name_of: N,
) -> MroResult<IdMro>
where
    F: Fn(TypeId) -> Option<IdMro>,
    N: Fn(TypeId) -> String,
{
    let mut result = IdMro::new();
    result.push(class_id);

    if bases.is_empty() {
        return Ok(result);
    }

    for (i, base) in bases.iter().enumerate() {
        if bases[i + 1..].contains(base) {
            return Err(MroError::DuplicateBase {
                class_name: name_of(class_id),
                duplicate: name_of(*base),
            });
        }
    }

    // [L[P1], L[P2], ..., [P1, P2, ...]]
    let mut merge_lists: Vec<Vec<TypeId>> = bases
        .iter()
        .map(|&base| match get_mro(base) {
            Some(mro) => mro.to_vec(),
            None => vec![base],
        })
        .collect();
    merge_lists.push(bases.to_vec());

    if merge_lists.iter().any(|list| list.contains(&class_id)) {
        return Err(MroError::InheritanceCycle {
            class_name: name_of(class_id),
        });
    }

    loop {
        merge_lists.retain(|list| !list.is_empty());
        if merge_lists.is_empty() {
            break;
        }

        // A good head appears in no list's tail.
        let good_head = merge_lists.iter().map(|list| list[0]).find(|candidate| {
            !merge_lists
                .iter()
                .any(|list| list.len() > 1 && list[1..].contains(candidate))
        });

        match good_head {
            Some(head) => {
                result.push(head);
                for list in &mut merge_lists {
                    if list.first() == Some(&head) {
                        list.remove(0);
                    }
                }
            }
            None => {
                let conflicting = merge_lists.iter().map(|list| name_of(list[0])).collect();
                return Err(MroError::InconsistentMro {
                    class_name: name_of(class_id),
                    conflicting,
                });
            }
        }
    }

    Ok(result)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const OBJECT: TypeId = TypeId::from_raw(1);

    fn id(n: u32) -> TypeId {
        TypeId::from_raw(n)
    }

    fn name(t: TypeId) -> String {
        format!("class_{}", t.raw())
    }

    /// Compute and record an MRO using previously recorded ones.
    fn define(mros: &mut HashMap<TypeId, IdMro>, class: TypeId, bases: &[TypeId]) -> IdMro {
        let mro = compute_c3_mro(class, bases, |b| mros.get(&b).cloned(), name).unwrap();
        mros.insert(class, mro.clone());
        mro
    }

    fn with_object() -> HashMap<TypeId, IdMro> {
        let mut mros = HashMap::new();
        define(&mut mros, OBJECT, &[]);
        mros
    }

    #[test]
    fn test_root_class() {
        let mro = compute_c3_mro(OBJECT, &[], |_| None, name).unwrap();
        assert_eq!(mro.as_slice(), &[OBJECT]);
    }

    #[test]
    fn test_single_inheritance_chain() {
        let mut mros = with_object();
        let (a, b, c) = (id(10), id(11), id(12));
        assert_eq!(define(&mut mros, a, &[OBJECT]).as_slice(), &[a, OBJECT]);
        assert_eq!(define(&mut mros, b, &[a]).as_slice(), &[b, a, OBJECT]);
        assert_eq!(define(&mut mros, c, &[b]).as_slice(), &[c, b, a, OBJECT]);
    }

    #[test]
    fn test_diamond_inheritance() {
        let mut mros = with_object();
        let (a, b, c, d) = (id(10), id(11), id(12), id(13));
        define(&mut mros, a, &[OBJECT]);
        define(&mut mros, b, &[a]);
        define(&mut mros, c, &[a]);
        assert_eq!(define(&mut mros, d, &[b, c]).as_slice(), &[d, b, c, a, OBJECT]);
    }

    #[test]
    fn test_complex_diamond() {
        let mut mros = with_object();
        let (a, b, c, d, e, f) = (id(10), id(11), id(12), id(13), id(14), id(15));
        define(&mut mros, a, &[OBJECT]);
        define(&mut mros, b, &[OBJECT]);
        define(&mut mros, c, &[OBJECT]);
        assert_eq!(define(&mut mros, d, &[a, b]).as_slice(), &[d, a, b, OBJECT]);
        assert_eq!(define(&mut mros, e, &[b, c]).as_slice(), &[e, b, c, OBJECT]);
        assert_eq!(
            define(&mut mros, f, &[d, e]).as_slice(),
            &[f, d, a, e, b, c, OBJECT]
        );
    }

    #[test]
    fn test_duplicate_base_error() {
        let mros = with_object();
        let result = compute_c3_mro(id(11), &[OBJECT, OBJECT], |b| mros.get(&b).cloned(), name);
        assert!(matches!(result, Err(MroError::DuplicateBase { .. })));
    }

    #[test]
    fn test_inconsistent_mro_error() {
        let mut mros = with_object();
        let (a, b) = (id(10), id(11));
        define(&mut mros, a, &[OBJECT]);
        define(&mut mros, b, &[a]);

        let result = compute_c3_mro(id(12), &[a, b], |t| mros.get(&t).cloned(), name);
        assert!(matches!(result, Err(MroError::InconsistentMro { .. })));
    }

    #[test]
    fn test_cycle_detected() {
        let mut mros = with_object();
        let (a, b) = (id(10), id(11));
        define(&mut mros, a, &[OBJECT]);
        define(&mut mros, b, &[a]);

        // a.__bases__ = (b,)
        let result = compute_c3_mro(a, &[b], |t| mros.get(&t).cloned(), name);
        assert_eq!(
            result,
            Err(MroError::InheritanceCycle {
                class_name: "class_10".into()
            })
        );
    }

    #[test]
    fn test_parent_with_custom_mro() {
        // The parent resolves through (A, object) without itself.
        let mut mros = with_object();
        let (a, p, c) = (id(10), id(11), id(12));
        define(&mut mros, a, &[OBJECT]);
        mros.insert(p, smallvec::smallvec![a, OBJECT]);

        let mro = compute_c3_mro(c, &[p], |t| mros.get(&t).cloned(), name).unwrap();
        assert_eq!(mro.as_slice(), &[c, a, OBJECT, p]);
    }

    #[test]
    fn test_error_converts_to_type_error() {
        let err: cinder_core::CinderError = MroError::InheritanceCycle {
            class_name: "X".into(),
        }
        .into();
        assert_eq!(err.exception_type(), "TypeError");
    }

    #[test]
    fn test_small_hierarchies_stay_inline() {
        let mut mros = with_object();
        let mro = define(&mut mros, id(10), &[OBJECT]);
        assert!(!mro.spilled());
    }
}
