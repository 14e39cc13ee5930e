// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use std::collections::HashSet;

#[test]
fn all_lists_every_category_once() {
    let unique: HashSet<_> = Category::ALL.iter().collect();
    assert_eq!(unique.len(), Category::ALL.len());
}

#[test]
fn as_str_matches_serde_name() {
    for category in Category::ALL {
        let json = serde_json::to_string(&category).unwrap();
        assert_eq!(json, format!("\"{}\"", category.as_str()));
    }
}

#[test]
fn pinned_categories_are_generator_backed() {
    for category in Category::ALL.iter().filter(|c| c.is_pinned()) {
        assert!(!category.is_local(), "{category} is pinned but local");
    }
}

#[test]
fn unambiguous_classification_omits_flag() {
    let c = Classification {
        category: Category::Listing,
        tier: SensitivityTier::Standard,
        ambiguous: false,
    };
    let json = serde_json::to_string(&c).unwrap();
    assert_eq!(json, r#"{"category":"listing","tier":"standard"}"#);
}
