//! Property tests for the domain classifier.

use proptest::prelude::*;
use usage_agent::core::ConnectionAggregator;
use usage_agent::network::{classify, is_accepted, Classification, FqdnCache, StaticResolver};
use usage_agent::RetentionPolicy;

fn label() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9]{0,9}"
}

fn candidate() -> impl Strategy<Value = String> {
    prop_oneof![
        prop::collection::vec(label(), 1..6).prop_map(|labels| labels.join(".")),
        "[A-Za-z0-9.-]{0,40}",
    ]
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 256,
        .. ProptestConfig::default()
    })]

    #[test]
    fn doubleclick_is_always_rejected(prefix in "[a-z0-9-]{0,12}", tld in "[a-z]{2,6}") {
        let candidate = format!("{prefix}doubleclick.{tld}");
        prop_assert!(!is_accepted(&candidate));

        let line = format!("IP 10.0.0.2.5353 > 10.0.0.1.53: 1+ A? {candidate}. (40)");
        let mut aggregator = ConnectionAggregator::new(
            RetentionPolicy::default(),
            FqdnCache::new(Box::new(StaticResolver::new())),
        );
        prop_assert!(aggregator.record_dns_line(&line).is_none());
    }

    #[test]
    fn four_or_more_labels_are_rejected(labels in prop::collection::vec(label(), 4..9)) {
        prop_assert!(!is_accepted(&labels.join(".")));
    }

    #[test]
    fn classification_is_order_independent(candidates in prop::collection::vec(candidate(), 1..20)) {
        let forward: Vec<Classification> = candidates.iter().map(|c| classify(c)).collect();
        let backward: Vec<Classification> = candidates.iter().rev().map(|c| classify(c)).collect();
        let backward: Vec<Classification> = backward.into_iter().rev().collect();
        prop_assert_eq!(forward, backward);
    }

    #[test]
    fn accepted_names_are_normalised(candidate in candidate()) {
        if let Classification::Accepted(domain) = classify(&candidate) {
            prop_assert_eq!(&domain, &candidate.to_ascii_lowercase());
            prop_assert!(domain.contains('.'));
            prop_assert!(domain.split('.').count() <= 3);
            prop_assert!(domain.len() >= 4 && domain.len() <= 253);
        }
    }
}
