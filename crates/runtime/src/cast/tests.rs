use ember_abi::TypeFlags;

use super::{is_assignable_to, structurally_equivalent, variant_compatible};
use crate::env;
use crate::testing::{env_guard, install_test_env, set_generic_definition, DescriptorBuilder};
use crate::testing::DescriptorFixture;

/// object ← string ← (nothing); a plain three-deep class chain.
fn class_chain() -> (DescriptorFixture, DescriptorFixture, DescriptorFixture) {
    let root = DescriptorBuilder::new().vtable(&[1, 2, 3]).build();
    let mid = DescriptorBuilder::new()
        .vtable(&[1, 2, 3, 4])
        .related(root.descriptor_ptr())
        .build();
    let leaf = DescriptorBuilder::new()
        .vtable(&[1, 2, 3, 4, 5])
        .related(mid.descriptor_ptr())
        .build();
    (root, mid, leaf)
}

#[test]
fn assignability_is_reflexive() {
    let _guard = env_guard();
    install_test_env();
    let (root, mid, leaf) = class_chain();
    for fixture in [&root, &mid, &leaf] {
        assert!(is_assignable_to(fixture.descriptor(), fixture.descriptor()));
    }
}

#[test]
fn parent_chain_assigns_upward_only() {
    let _guard = env_guard();
    install_test_env();
    let (root, mid, leaf) = class_chain();
    assert!(is_assignable_to(leaf.descriptor(), mid.descriptor()));
    assert!(is_assignable_to(mid.descriptor(), root.descriptor()));
    // transitivity across the whole chain
    assert!(is_assignable_to(leaf.descriptor(), root.descriptor()));
    // never downward
    assert!(!is_assignable_to(root.descriptor(), mid.descriptor()));
    assert!(!is_assignable_to(mid.descriptor(), leaf.descriptor()));
    assert!(!is_assignable_to(root.descriptor(), leaf.descriptor()));
}

#[test]
fn interface_implementation_assigns() {
    let _guard = env_guard();
    install_test_env();
    let iface = DescriptorBuilder::new().flag(TypeFlags::IS_INTERFACE).build();
    let other = DescriptorBuilder::new().flag(TypeFlags::IS_INTERFACE).type_hash(4).build();
    let base = DescriptorBuilder::new()
        .interface_with_start(iface.descriptor_ptr(), 3)
        .build();
    let derived = DescriptorBuilder::new().related(base.descriptor_ptr()).build();

    assert!(is_assignable_to(base.descriptor(), iface.descriptor()));
    // found on the parent
    assert!(is_assignable_to(derived.descriptor(), iface.descriptor()));
    assert!(!is_assignable_to(base.descriptor(), other.descriptor()));
    // interfaces never assign to classes
    assert!(!is_assignable_to(iface.descriptor(), base.descriptor()));
}

#[test]
fn covariant_interfaces_assign_along_the_argument() {
    let _guard = env_guard();
    install_test_env();
    let object = DescriptorBuilder::new().vtable(&[1]).build();
    let string = DescriptorBuilder::new()
        .vtable(&[1, 2])
        .related(object.descriptor_ptr())
        .build();
    let def = DescriptorBuilder::new()
        .flag(TypeFlags::IS_INTERFACE)
        .flag(TypeFlags::HAS_VARIANCE)
        .type_hash(1) // covariant first parameter
        .build();
    let of_string = DescriptorBuilder::new()
        .flag(TypeFlags::IS_INTERFACE)
        .related(string.descriptor_ptr())
        .build();
    let of_object = DescriptorBuilder::new()
        .flag(TypeFlags::IS_INTERFACE)
        .related(object.descriptor_ptr())
        .build();
    set_generic_definition(of_string.descriptor_ptr(), def.descriptor_ptr());
    set_generic_definition(of_object.descriptor_ptr(), def.descriptor_ptr());

    assert!(variant_compatible(of_string.descriptor(), of_object.descriptor()));
    assert!(is_assignable_to(of_string.descriptor(), of_object.descriptor()));
    assert!(!is_assignable_to(of_object.descriptor(), of_string.descriptor()));
}

#[test]
fn contravariant_interfaces_assign_the_other_way() {
    let _guard = env_guard();
    install_test_env();
    let base = DescriptorBuilder::new().vtable(&[1]).build();
    let derived = DescriptorBuilder::new()
        .vtable(&[1, 2])
        .related(base.descriptor_ptr())
        .build();
    let def = DescriptorBuilder::new()
        .flag(TypeFlags::IS_INTERFACE)
        .flag(TypeFlags::HAS_VARIANCE)
        .type_hash(2) // contravariant first parameter
        .build();
    let of_base = DescriptorBuilder::new()
        .flag(TypeFlags::IS_INTERFACE)
        .related(base.descriptor_ptr())
        .build();
    let of_derived = DescriptorBuilder::new()
        .flag(TypeFlags::IS_INTERFACE)
        .related(derived.descriptor_ptr())
        .build();
    set_generic_definition(of_base.descriptor_ptr(), def.descriptor_ptr());
    set_generic_definition(of_derived.descriptor_ptr(), def.descriptor_ptr());

    assert!(is_assignable_to(of_base.descriptor(), of_derived.descriptor()));
    assert!(!is_assignable_to(of_derived.descriptor(), of_base.descriptor()));
}

#[test]
fn invariant_interfaces_require_identity() {
    let _guard = env_guard();
    install_test_env();
    let object = DescriptorBuilder::new().vtable(&[1]).build();
    let string = DescriptorBuilder::new()
        .vtable(&[1, 2])
        .related(object.descriptor_ptr())
        .build();
    let def = DescriptorBuilder::new()
        .flag(TypeFlags::IS_INTERFACE)
        .flag(TypeFlags::HAS_VARIANCE)
        .type_hash(0) // invariant
        .build();
    let of_string = DescriptorBuilder::new()
        .flag(TypeFlags::IS_INTERFACE)
        .related(string.descriptor_ptr())
        .build();
    let of_object = DescriptorBuilder::new()
        .flag(TypeFlags::IS_INTERFACE)
        .related(object.descriptor_ptr())
        .build();
    set_generic_definition(of_string.descriptor_ptr(), def.descriptor_ptr());
    set_generic_definition(of_object.descriptor_ptr(), def.descriptor_ptr());

    assert!(!is_assignable_to(of_string.descriptor(), of_object.descriptor()));
    assert!(!is_assignable_to(of_object.descriptor(), of_string.descriptor()));
    assert!(is_assignable_to(of_string.descriptor(), of_string.descriptor()));
}

#[test]
fn variance_requires_a_shared_definition() {
    let _guard = env_guard();
    install_test_env();
    let arg = DescriptorBuilder::new().build();
    let def_a = DescriptorBuilder::new()
        .flag(TypeFlags::IS_INTERFACE)
        .flag(TypeFlags::HAS_VARIANCE)
        .type_hash(1)
        .build();
    let def_b = DescriptorBuilder::new()
        .flag(TypeFlags::IS_INTERFACE)
        .flag(TypeFlags::HAS_VARIANCE)
        .type_hash(1)
        .build();
    let a = DescriptorBuilder::new()
        .flag(TypeFlags::IS_INTERFACE)
        .related(arg.descriptor_ptr())
        .build();
    let b = DescriptorBuilder::new()
        .flag(TypeFlags::IS_INTERFACE)
        .related(arg.descriptor_ptr())
        .build();
    set_generic_definition(a.descriptor_ptr(), def_a.descriptor_ptr());
    set_generic_definition(b.descriptor_ptr(), def_b.descriptor_ptr());
    assert!(!variant_compatible(a.descriptor(), b.descriptor()));

    // and the definition must declare variance
    let plain_def = DescriptorBuilder::new().flag(TypeFlags::IS_INTERFACE).build();
    let c = DescriptorBuilder::new()
        .flag(TypeFlags::IS_INTERFACE)
        .related(arg.descriptor_ptr())
        .build();
    let d = DescriptorBuilder::new()
        .flag(TypeFlags::IS_INTERFACE)
        .related(arg.descriptor_ptr())
        .build();
    set_generic_definition(c.descriptor_ptr(), plain_def.descriptor_ptr());
    set_generic_definition(d.descriptor_ptr(), plain_def.descriptor_ptr());
    assert!(!variant_compatible(c.descriptor(), d.descriptor()));
}

#[test]
fn reference_arrays_are_covariant() {
    let _guard = env_guard();
    install_test_env();
    let object = DescriptorBuilder::new().vtable(&[1]).build();
    let string = DescriptorBuilder::new()
        .vtable(&[1, 2])
        .related(object.descriptor_ptr())
        .build();
    let string_array = DescriptorBuilder::new()
        .flag(TypeFlags::IS_ARRAY)
        .flag(TypeFlags::HAS_COMPONENT_SIZE)
        .component_size(8)
        .related(string.descriptor_ptr())
        .build();
    let object_array = DescriptorBuilder::new()
        .flag(TypeFlags::IS_ARRAY)
        .flag(TypeFlags::HAS_COMPONENT_SIZE)
        .component_size(8)
        .related(object.descriptor_ptr())
        .build();
    assert!(is_assignable_to(string_array.descriptor(), object_array.descriptor()));
    assert!(!is_assignable_to(object_array.descriptor(), string_array.descriptor()));
}

#[test]
fn value_type_arrays_are_invariant() {
    let _guard = env_guard();
    install_test_env();
    let object = DescriptorBuilder::new().vtable(&[1]).build();
    let int32 = DescriptorBuilder::new()
        .flag(TypeFlags::IS_VALUE_TYPE)
        .related(object.descriptor_ptr())
        .build();
    let int_array = DescriptorBuilder::new()
        .flag(TypeFlags::IS_ARRAY)
        .flag(TypeFlags::HAS_COMPONENT_SIZE)
        .component_size(4)
        .related(int32.descriptor_ptr())
        .build();
    let object_array = DescriptorBuilder::new()
        .flag(TypeFlags::IS_ARRAY)
        .flag(TypeFlags::HAS_COMPONENT_SIZE)
        .component_size(8)
        .related(object.descriptor_ptr())
        .build();
    assert!(!is_assignable_to(int_array.descriptor(), object_array.descriptor()));
}

// ---- structural equivalence ---------------------------------------------

/// Carves the address range of `fixture`'s buffer out as "the boot
/// image", so it classifies as AOT world and everything else as kernel.
fn classify_as_aot(fixture: &DescriptorFixture) {
    let base = fixture.base();
    env::set_aot_image_range(base, base + 0x1000);
}

#[test]
fn same_world_needs_matching_hashes() {
    let _guard = env_guard();
    install_test_env();
    let a = DescriptorBuilder::new().vtable(&[1, 2]).type_hash(0x42).build();
    let b = DescriptorBuilder::new().vtable(&[1, 2]).type_hash(0x42).build();
    let c = DescriptorBuilder::new().vtable(&[1, 2]).type_hash(0x43).build();
    let unhashed = DescriptorBuilder::new().vtable(&[1, 2]).build();
    assert!(structurally_equivalent(a.descriptor(), b.descriptor()));
    assert!(!structurally_equivalent(a.descriptor(), c.descriptor()));
    // within one world a missing hash means distinct pointers are
    // distinct types
    assert!(!structurally_equivalent(a.descriptor(), unhashed.descriptor()));
}

#[test]
fn same_world_hash_match_overrides_slot_count() {
    let _guard = env_guard();
    install_test_env();
    let a = DescriptorBuilder::new().vtable(&[1, 2]).type_hash(0x42).build();
    // malformed slot count, same hash
    let b = DescriptorBuilder::new().vtable(&[1, 2, 3, 4]).type_hash(0x42).build();
    assert!(structurally_equivalent(a.descriptor(), b.descriptor()));
}

#[test]
fn cross_world_matches_on_shape_and_ignores_hashes() {
    let _guard = env_guard();
    install_test_env();
    let aot = DescriptorBuilder::new().vtable(&[1, 2, 3]).type_hash(0x1111).build();
    let kernel = DescriptorBuilder::new().vtable(&[1, 2, 3]).type_hash(0x9999).build();
    let smaller = DescriptorBuilder::new().vtable(&[1]).build();
    classify_as_aot(&aot);
    assert!(structurally_equivalent(aot.descriptor(), kernel.descriptor()));
    assert!(structurally_equivalent(kernel.descriptor(), aot.descriptor()));
    assert!(!structurally_equivalent(aot.descriptor(), smaller.descriptor()));
    // cross-world identity makes assignment work in both directions
    assert!(is_assignable_to(aot.descriptor(), kernel.descriptor()));
    assert!(is_assignable_to(kernel.descriptor(), aot.descriptor()));
}

#[test]
fn cross_world_generics_compare_base_sizes() {
    let _guard = env_guard();
    install_test_env();
    let arg = DescriptorBuilder::new().build();
    let aot = DescriptorBuilder::new()
        .vtable(&[1])
        .base_size(32)
        .related(arg.descriptor_ptr())
        .build();
    let kernel_same = DescriptorBuilder::new()
        .vtable(&[1])
        .base_size(32)
        .related(arg.descriptor_ptr())
        .build();
    let kernel_bigger = DescriptorBuilder::new()
        .vtable(&[1])
        .base_size(48)
        .related(arg.descriptor_ptr())
        .build();
    classify_as_aot(&aot);
    assert!(structurally_equivalent(aot.descriptor(), kernel_same.descriptor()));
    assert!(!structurally_equivalent(aot.descriptor(), kernel_bigger.descriptor()));
}

#[test]
fn one_sided_generic_is_cross_world_only() {
    let _guard = env_guard();
    install_test_env();
    let arg = DescriptorBuilder::new().build();
    let bare = DescriptorBuilder::new().vtable(&[1]).type_hash(0x7).build();
    let instantiated = DescriptorBuilder::new()
        .vtable(&[1])
        .type_hash(0x7)
        .related(arg.descriptor_ptr())
        .build();
    // same world: never
    assert!(!structurally_equivalent(bare.descriptor(), instantiated.descriptor()));
    classify_as_aot(&bare);
    // cross world: an AOT interface row may simply omit the argument
    assert!(structurally_equivalent(bare.descriptor(), instantiated.descriptor()));
}

#[test]
fn interface_dispatch_across_worlds() {
    let _guard = env_guard();
    install_test_env();
    // the caller holds a kernel instantiation of the interface, the
    // callee's map records the AOT copy
    let aot_iface = DescriptorBuilder::new()
        .flag(TypeFlags::IS_INTERFACE)
        .vtable(&[0, 0])
        .build();
    let kernel_iface = DescriptorBuilder::new()
        .flag(TypeFlags::IS_INTERFACE)
        .vtable(&[0, 0])
        .build();
    let host = DescriptorBuilder::new()
        .interface_with_start(aot_iface.descriptor_ptr(), 5)
        .build();
    classify_as_aot(&aot_iface);
    assert!(is_assignable_to(host.descriptor(), kernel_iface.descriptor()));
    assert_eq!(
        host.descriptor().get_interface_method_slot(kernel_iface.descriptor(), 1),
        6
    );
}
