//! Property-based tests for the published key set across rotations.

use proptest::prelude::*;
use std::collections::HashSet;
use std::sync::Arc;
use token_service::config::KeyPolicy;
use token_service::jwks::JwksPublisher;
use token_service::storage::InMemoryKeyStore;
use token_service::KeyManager;

proptest! {
    // RSA key generation dominates; keep the case count small.
    #![proptest_config(ProptestConfig::with_cases(4))]

    /// After any number of rotations the set lists the active key first
    /// and still carries every earlier key, each exactly once.
    #[test]
    fn prop_rotation_retains_previous_keys(rotations in 1usize..4) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let keys = Arc::new(
                KeyManager::initialize(Arc::new(InMemoryKeyStore::new()), KeyPolicy::default())
                    .await
                    .unwrap(),
            );
            let publisher = JwksPublisher::new(Arc::clone(&keys));

            let mut issued = vec![keys.active_key_id()];
            for _ in 0..rotations {
                issued.push(keys.rotate().await.unwrap());
            }

            let jwks = publisher.get_jwks();
            prop_assert_eq!(jwks.keys.len(), rotations + 1);
            prop_assert_eq!(&jwks.keys[0].kid, issued.last().unwrap());
            prop_assert_eq!(publisher.current_key_id(), issued.last().unwrap().clone());

            let published: HashSet<&str> = jwks.keys.iter().map(|k| k.kid.as_str()).collect();
            prop_assert_eq!(published.len(), jwks.keys.len());
            for kid in &issued {
                prop_assert!(published.contains(kid.as_str()));
            }
            for jwk in &jwks.keys {
                prop_assert_eq!(jwk.kty.as_str(), "RSA");
                prop_assert_eq!(jwk.key_use.as_str(), "sig");
                prop_assert_eq!(jwk.alg.as_str(), "RS256");
            }
            Ok(())
        })?;
    }
}
