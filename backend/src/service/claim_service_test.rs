#[cfg(test)]
mod tests {
    use crate::api_error::ApiError;
    use crate::auth::{BcryptHasher, CredentialHasher, JwtConfig, JwtService};
    use crate::models::CreatePlayerDTO;
    use crate::service::claim_service::ClaimService;
    use crate::service::retry::RetryPolicy;
    use crate::store::{MemoryStore, Store};
    use chrono::Duration;
    use jsonwebtoken::Algorithm;
    use std::sync::Arc;
    use std::time::{Duration as StdDuration, Instant};
    use tokio_test::{assert_err, assert_ok};
    use uuid::Uuid;

    fn test_jwt() -> Arc<JwtService> {
        Arc::new(JwtService::new(JwtConfig {
            secret_key: "claim-service-test-secret".to_string(),
            access_token_expiry: Duration::minutes(5),
            algorithm: Algorithm::HS256,
            issuer: Some("CapsElo".to_string()),
            audience: Some("CapsElo API".to_string()),
        }))
    }

    /// Helper to create a service over a fresh in-memory store
    fn create_test_service() -> (Arc<MemoryStore>, Arc<ClaimService>) {
        let store = Arc::new(MemoryStore::new());
        let service = ClaimService::new(
            store.clone(),
            Arc::new(BcryptHasher::new(4)),
            test_jwt(),
            RetryPolicy::with_attempts(3),
        );
        (store, Arc::new(service))
    }

    fn dto(name: &str) -> CreatePlayerDTO {
        CreatePlayerDTO {
            display_name: name.to_string(),
        }
    }

    #[tokio::test]
    async fn test_create_then_search() {
        let (_, service) = create_test_service();
        let id = service.create(dto("  Alfred ")).await.unwrap();

        let hits = service.search("alf", None).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, id);
        assert_eq!(hits[0].display_name, "Alfred");
        assert!(!hits[0].claimed);

        let player = service.get_player(id).await.unwrap();
        assert_eq!(player.rating, 1500);
        assert_eq!(player.games_played, 0);
    }

    #[tokio::test]
    async fn test_search_limit_is_clamped() {
        let (_, service) = create_test_service();
        for i in 0..55 {
            service.create(dto(&format!("player{:02}", i))).await.unwrap();
        }

        assert_eq!(service.search("player", None).await.unwrap().len(), 50);
        assert_eq!(service.search("player", Some(500)).await.unwrap().len(), 50);
        assert_eq!(service.search("player", Some(0)).await.unwrap().len(), 1);
        assert_eq!(service.search("player", Some(3)).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_create_rejects_case_insensitive_duplicate() {
        let (_, service) = create_test_service();
        assert_ok!(service.create(dto("Al")).await);

        let err = service.create(dto("al")).await.unwrap_err();
        assert!(matches!(err, ApiError::Conflict(_)), "got {:?}", err);
    }

    #[tokio::test]
    async fn test_create_validates_trimmed_length() {
        let (_, service) = create_test_service();

        let err = service.create(dto("   A   ")).await.unwrap_err();
        assert!(matches!(err, ApiError::ValidationError(_)));

        let err = service.create(dto(&"x".repeat(25))).await.unwrap_err();
        assert!(matches!(err, ApiError::ValidationError(_)));

        assert_ok!(service.create(dto(&"x".repeat(24))).await);
    }

    #[tokio::test]
    async fn test_custom_initial_rating() {
        let store = Arc::new(MemoryStore::new());
        let service = ClaimService::new(
            store.clone(),
            Arc::new(BcryptHasher::new(4)),
            test_jwt(),
            RetryPolicy::default(),
        )
        .with_initial_rating(1200);

        let id = service.create(dto("Newbie")).await.unwrap();
        assert_eq!(service.get_player(id).await.unwrap().rating, 1200);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_create_same_name_has_one_winner() {
        let (_, service) = create_test_service();

        let a = tokio::spawn({
            let service = service.clone();
            async move { service.create(dto("Racer")).await }
        });
        let b = tokio::spawn({
            let service = service.clone();
            async move { service.create(dto("RACER")).await }
        });
        let results = [a.await.unwrap(), b.await.unwrap()];

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(results
            .iter()
            .any(|r| matches!(r, Err(ApiError::Conflict(_)))));
        assert_eq!(service.search("racer", None).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_claim_unknown_player() {
        let (_, service) = create_test_service();
        let err = service.claim(Uuid::new_v4(), "long enough").await.unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_claim_requires_reasonable_secret() {
        let (_, service) = create_test_service();
        let id = service.create(dto("Shorty")).await.unwrap();

        let err = service.claim(id, "short").await.unwrap_err();
        assert!(matches!(err, ApiError::ValidationError(_)));

        // longer than bcrypt reads
        let err = service.claim(id, &"x".repeat(73)).await.unwrap_err();
        assert!(matches!(err, ApiError::ValidationError(_)));
        assert!(!service.get_player(id).await.unwrap().claimed);

        assert_ok!(service.claim(id, &"x".repeat(72)).await);
    }

    /// Hasher that holds its thread for a while and records when it finished.
    struct SlowHasher {
        inner: BcryptHasher,
        finished: Arc<std::sync::Mutex<Option<Instant>>>,
    }

    impl CredentialHasher for SlowHasher {
        fn hash(&self, secret: &str) -> Result<String, ApiError> {
            std::thread::sleep(StdDuration::from_millis(200));
            let stored = self.inner.hash(secret);
            *self.finished.lock().unwrap() = Some(Instant::now());
            stored
        }

        fn verify(&self, secret: &str, credential_ref: &str) -> Result<bool, ApiError> {
            self.inner.verify(secret, credential_ref)
        }
    }

    #[tokio::test]
    async fn test_hashing_does_not_block_the_runtime() {
        let store = Arc::new(MemoryStore::new());
        let finished = Arc::new(std::sync::Mutex::new(None));
        let service = ClaimService::new(
            store,
            Arc::new(SlowHasher {
                inner: BcryptHasher::new(4),
                finished: finished.clone(),
            }),
            test_jwt(),
            RetryPolicy::with_attempts(3),
        );
        let id = service.create(dto("Patient")).await.unwrap();

        // single-threaded runtime: the timer only fires on time if the hash runs elsewhere
        let (claimed, timer_fired) = tokio::join!(service.claim(id, "slow-secret"), async {
            tokio::time::sleep(StdDuration::from_millis(10)).await;
            Instant::now()
        });
        assert_ok!(claimed);

        let hashed_at = (*finished.lock().unwrap()).expect("hash ran");
        assert!(timer_fired < hashed_at);
    }

    #[tokio::test]
    async fn test_claim_is_one_time() {
        let (_, service) = create_test_service();
        let id = service.create(dto("Dana")).await.unwrap();

        assert_ok!(service.claim(id, "first-secret").await);
        let err = service.claim(id, "second-secret").await.unwrap_err();
        assert!(matches!(err, ApiError::AlreadyClaimed));

        // the original credential still signs in, the loser's does not
        assert_ok!(service.sign_in(id, "first-secret").await);
        assert_err!(service.sign_in(id, "second-secret").await);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_claims_have_exactly_one_winner() {
        let (store, service) = create_test_service();
        let id = service.create(dto("Contested")).await.unwrap();

        let secrets = ["alpha-secret", "bravo-secret"];
        let handles: Vec<_> = secrets
            .iter()
            .map(|secret| {
                let service = service.clone();
                let secret = secret.to_string();
                tokio::spawn(async move { service.claim(id, &secret).await })
            })
            .collect();

        let mut results = Vec::new();
        for handle in handles {
            results.push(handle.await.unwrap());
        }

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert_eq!(
            results
                .iter()
                .filter(|r| matches!(r, Err(ApiError::AlreadyClaimed)))
                .count(),
            1
        );

        let player = store.get_player(id).await.unwrap().unwrap();
        assert!(player.claimed);
        let stored = player.credential_ref.unwrap();
        let hasher = BcryptHasher::new(4);
        let matching = secrets
            .iter()
            .filter(|s| hasher.verify(s, &stored).unwrap())
            .count();
        assert_eq!(matching, 1, "exactly one credential attached");
    }

    #[tokio::test]
    async fn test_claim_retries_transient_commit_failure() {
        let (store, service) = create_test_service();
        let id = service.create(dto("Retry")).await.unwrap();

        store.fail_next_commits(2);
        assert_ok!(service.claim(id, "persistent").await);
        assert!(service.get_player(id).await.unwrap().claimed);
    }

    #[tokio::test]
    async fn test_claim_gives_up_after_retry_budget() {
        let (store, service) = create_test_service();
        let id = service.create(dto("Unlucky")).await.unwrap();

        store.fail_next_commits(3);
        let err = service.claim(id, "persistent").await.unwrap_err();
        assert!(matches!(err, ApiError::Conflict(_)));
        assert!(!service.get_player(id).await.unwrap().claimed);
    }

    #[tokio::test]
    async fn test_sign_in_failures_are_indistinguishable() {
        let (_, service) = create_test_service();
        let unclaimed = service.create(dto("Nobody")).await.unwrap();
        let claimed = service.create(dto("Somebody")).await.unwrap();
        service.claim(claimed, "right-secret").await.unwrap();

        let messages: Vec<String> = vec![
            service.sign_in(Uuid::new_v4(), "right-secret").await,
            service.sign_in(unclaimed, "right-secret").await,
            service.sign_in(claimed, "wrong-secret").await,
        ]
        .into_iter()
        .map(|r| match r {
            Err(ApiError::Unauthorized(msg)) => msg,
            other => panic!("expected Unauthorized, got {:?}", other),
        })
        .collect();

        assert!(messages.windows(2).all(|w| w[0] == w[1]));
    }

    #[tokio::test]
    async fn test_sign_in_issues_token_for_player() {
        let (_, service) = create_test_service();
        let id = service.create(dto("Signer")).await.unwrap();
        service.claim(id, "right-secret").await.unwrap();

        let session = service.sign_in(id, "right-secret").await.unwrap();
        assert_eq!(session.player_id, id);
        assert_eq!(session.token_type, "Bearer");

        let claims = test_jwt().validate_token(&session.access_token).unwrap();
        assert_eq!(claims.player_id().unwrap(), id);
    }
}
