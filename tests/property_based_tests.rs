mod common;

use common::strategies::*;
use porter_core::config::TopicNameConfig;
use porter_core::{TopicId, TopicNameOverride};
use proptest::prelude::*;

fn naming(prefix: String, suffix: String, source: String) -> TopicNameConfig {
    TopicNameConfig {
        prefix,
        suffix,
        source,
    }
}

proptest! {
    /// Property: queue names never start or end with an underscore
    #[test]
    fn queue_names_are_trimmed(
        raw in valid_topic_strategy(),
        prefix in naming_part_strategy(),
        suffix in naming_part_strategy(),
        source in naming_part_strategy(),
    ) {
        let topic = TopicId::new(&raw, &naming(prefix, suffix, source)).unwrap();
        prop_assert!(!topic.queue_name().starts_with('_'), "{}", topic.queue_name());
        prop_assert!(!topic.queue_name().ends_with('_'), "{}", topic.queue_name());
        prop_assert_eq!(topic.dead_letter_queue_name(), format!("dead_letter_{}", topic.queue_name()));
    }

    /// Property: resolving the same inputs twice yields the same identity
    #[test]
    fn resolution_is_deterministic(
        raw in valid_topic_strategy(),
        prefix in naming_part_strategy(),
        suffix in naming_part_strategy(),
        source in naming_part_strategy(),
    ) {
        let config = naming(prefix, suffix, source);
        prop_assert_eq!(TopicId::new(&raw, &config).unwrap(), TopicId::new(&raw, &config).unwrap());
    }

    /// Property: names breaking any rule are rejected
    #[test]
    fn invalid_names_are_rejected(raw in invalid_topic_strategy()) {
        prop_assert!(!TopicId::is_valid_topic_name(&raw));
        prop_assert!(TopicId::new(&raw, &TopicNameConfig::default()).is_err());
    }

    /// Property: an override changes prefix and suffix but never the source
    #[test]
    fn override_keeps_source(
        raw in valid_topic_strategy(),
        source in "[a-z]{1,8}",
        override_prefix in "[a-z]{1,8}",
    ) {
        let config = naming("dev".to_string(), "v1".to_string(), source.clone());
        let name_override = TopicNameOverride::default()
            .with_prefix(override_prefix.clone())
            .without_suffix();
        let topic = TopicId::resolve(&raw, &config, Some(&name_override)).unwrap();

        prop_assert_eq!(topic.source(), source.as_str());
        prop_assert_eq!(topic.prefix(), override_prefix.as_str());
        prop_assert_eq!(topic.suffix(), "");
    }
}

#[test]
fn test_documented_examples() {
    for invalid in ["abcde", "0name", "name@bad"] {
        assert!(!TopicId::is_valid_topic_name(invalid), "{invalid}");
    }
    assert!(TopicId::is_valid_topic_name("good_name"));

    let topic = TopicId::new(
        "OrderCreated",
        &naming("dev".to_string(), "v2".to_string(), "BillingApi".to_string()),
    )
    .unwrap();
    assert_eq!(topic.event(), "order_created");
    assert_eq!(topic.topic_name(), "DevOrderCreatedV2");
    assert_eq!(topic.queue_name(), "dev_billing_api_order_created_v2");
}
