//! Unit tests for the host import table description

use core_types::{HostImport, ModuleSourceType, MODULE_SOURCE_RECORD_SIZE};

#[test]
fn test_all_imports_are_distinct() {
    let mut names: Vec<_> = HostImport::ALL.iter().map(|i| i.name()).collect();
    names.sort_unstable();
    names.dedup();
    assert_eq!(names.len(), HostImport::ALL.len());
}

#[test]
fn test_import_display_is_qualified() {
    assert_eq!(HostImport::ClassGcMark.to_string(), "hako.class_gc_mark");
}

#[test]
fn test_module_source_tags() {
    assert_eq!(ModuleSourceType::String.raw(), 0);
    assert_eq!(ModuleSourceType::Precompiled.raw(), 1);
    assert_eq!(ModuleSourceType::Error.raw(), 2);
    assert_eq!(ModuleSourceType::from_raw(0), ModuleSourceType::String);
}

#[test]
fn test_record_holds_three_words() {
    assert_eq!(MODULE_SOURCE_RECORD_SIZE, 3 * 4);
}
