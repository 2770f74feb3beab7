//! Instance-shadow tracking.
//!
//! A type's `INSTANCE_MAY_SHADOW` bit stays clear for as long as no instance
//! of the type (or of a subtype) has stored a name that the type or one of
//! its ancestors defines. While it is clear, a cache may answer a load from
//! the type without probing the instance dict.
//!
//! The tracker runs *before* a value is published to an instance dict, so
//! every watcher depending on the clear bit has fired by the time the
//! shadowing value can be read. It returns the types whose bit it set; the
//! caller bumps their versions before publishing, which also catches a
//! cache that resolved against the clear bit but registered its watch after
//! the event. The bit is never cleared.

use crate::object::{TypeFlags, TypeRef};
use crate::observer::MutationKind;
use cinder_core::InternedString;
use std::sync::Arc;

/// Set the shadow bit on `ty`, reporting the first transition.
fn mark(ty: &TypeRef, name: &InternedString, marked: &mut Vec<TypeRef>) {
    if ty.set_flag(TypeFlags::INSTANCE_MAY_SHADOW) {
        tracing::trace!(type_id = ty.id().raw(), name = %name, "instance may shadow");
        ty.hub()
            .mutation_observed(ty.id(), &MutationKind::InstanceShadowed(name.clone()));
        marked.push(Arc::clone(ty));
    }
}

/// An instance of `ty` is about to store `name` in its dict.
///
/// Marks `ty` and every MRO type whose own resolution finds `name`.
/// Returns the newly marked types.
#[must_use]
pub fn note_instance_write(ty: &TypeRef, name: &InternedString) -> Vec<TypeRef> {
    let mut marked = Vec::new();
    ty.note_instance_name(name);
    if ty.mro_defines(name) {
        mark(ty, name, &mut marked);
    }
    for ancestor in ty.mro() {
        if ancestor.id() != ty.id() && ancestor.mro_defines(name) {
            mark(&ancestor, name, &mut marked);
        }
    }
    marked
}

/// `name` is about to become an attribute of `ty`.
///
/// `dependents` are the types whose MRO contains `ty`. With a metaclass
/// `mro()` override these need not be subclasses of `ty`. Any of them whose
/// instances ever stored `name` now shadows it. Returns the newly marked
/// types.
#[must_use]
pub fn note_type_attr_added(
    ty: &TypeRef,
    name: &InternedString,
    dependents: &[TypeRef],
) -> Vec<TypeRef> {
    let mut marked = Vec::new();
    let mut shadowed = false;
    for sub in dependents {
        if sub.instance_ever_stored(name) {
            mark(sub, name, &mut marked);
            shadowed = true;
        }
    }
    if shadowed {
        mark(ty, name, &mut marked);
    }
    marked
}

/// `ty`'s bases are being reassigned: the inherited name set changes for
/// `ty` and every subtype, so all of them may shadow.
///
/// No event is sent; the bases change itself invalidates dependents.
pub fn note_bases_changed(ty: &TypeRef) {
    for t in ty.subtypes_topological() {
        if t.set_flag(TypeFlags::INSTANCE_MAY_SHADOW) {
            tracing::trace!(type_id = t.id().raw(), "instance may shadow after bases change");
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::observer::{MutationKind, RecordedEvent, RecordingObserver};
    use crate::runtime::{Runtime, TypeSpec};
    use cinder_core::{Value, intern};
    use std::sync::Arc;

    use super::*;

    fn shadow_events(rec: &RecordingObserver) -> Vec<RecordedEvent> {
        rec.take()
            .into_iter()
            .filter(|e| {
                matches!(
                    e,
                    RecordedEvent::Mutation(_, MutationKind::InstanceShadowed(_))
                )
            })
            .collect()
    }

    #[test]
    fn test_write_of_type_name_marks_receiver_and_host() {
        let rt = Runtime::new();
        let a = rt
            .new_type(TypeSpec::new("A").attr("foo", Value::int(1)))
            .unwrap();
        let b = rt.new_type(TypeSpec::new("B").base(&a)).unwrap();
        let rec = Arc::new(RecordingObserver::new());
        rt.register_observer(rec.clone());

        assert!(note_instance_write(&b, &intern("bar")).is_empty());
        assert!(!b.may_shadow());
        assert!(shadow_events(&rec).is_empty());

        let marked = note_instance_write(&b, &intern("foo"));
        assert!(b.may_shadow());
        assert!(a.may_shadow());
        assert_eq!(shadow_events(&rec).len(), 2);
        let mut ids: Vec<_> = marked.iter().map(|t| t.id()).collect();
        ids.sort_by_key(|id| id.raw());
        assert_eq!(ids, vec![a.id(), b.id()]);

        // Already set: no further events.
        assert!(note_instance_write(&b, &intern("foo")).is_empty());
        assert!(shadow_events(&rec).is_empty());
    }

    #[test]
    fn test_type_attr_added_after_instance_write() {
        let rt = Runtime::new();
        let a = rt.new_type(TypeSpec::new("A")).unwrap();
        let b = rt.new_type(TypeSpec::new("B").base(&a)).unwrap();

        assert!(note_instance_write(&b, &intern("x")).is_empty());
        assert!(!b.may_shadow());

        let marked = note_type_attr_added(&a, &intern("x"), &[a.clone(), b.clone()]);
        assert_eq!(marked.len(), 2);
        assert!(b.may_shadow());
        assert!(a.may_shadow());
    }

    #[test]
    fn test_unrelated_attr_added_leaves_bit_clear() {
        let rt = Runtime::new();
        let a = rt.new_type(TypeSpec::new("A")).unwrap();
        let _ = note_instance_write(&a, &intern("x"));
        assert!(note_type_attr_added(&a, &intern("y"), &[a.clone()]).is_empty());
        assert!(!a.may_shadow());
    }

    #[test]
    fn test_bases_change_marks_subtree() {
        let rt = Runtime::new();
        let a = rt.new_type(TypeSpec::new("A")).unwrap();
        let b = rt.new_type(TypeSpec::new("B").base(&a)).unwrap();
        note_bases_changed(&a);
        assert!(a.may_shadow());
        assert!(b.may_shadow());
    }
}
