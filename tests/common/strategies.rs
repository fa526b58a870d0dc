use proptest::prelude::*;

/// Raw topic names accepted by the naming rules
pub fn valid_topic_strategy() -> impl Strategy<Value = String> {
    "[a-zA-Z][a-zA-Z0-9_]{5,40}"
}

/// Prefix, suffix and source values as operators write them
pub fn naming_part_strategy() -> impl Strategy<Value = String> {
    prop_oneof![
        Just(String::new()),
        "[a-z]{1,8}",
        "[A-Z][a-z]{1,8}",
        "[a-z]{1,5}_[a-z0-9]{1,5}",
        "_[a-z]{1,6}_",
    ]
}

/// Raw topic names violating at least one rule
pub fn invalid_topic_strategy() -> impl Strategy<Value = String> {
    prop_oneof![
        "[a-zA-Z][a-zA-Z0-9_]{0,4}",
        "[0-9_][a-zA-Z0-9_]{5,20}",
        "[a-zA-Z][a-zA-Z0-9_]{5,10}[@ .\\-][a-zA-Z0-9_]{0,5}",
    ]
}
