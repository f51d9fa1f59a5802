//! Integration tests for request-relay
//!
//! These exercise the notification pipeline's local stages (payload parsing,
//! rendering, context recovery, authorization, configuration) without
//! external services.

use request_relay::dispatch::WebhookPayload;
use request_relay::handlers::extract_context;
use request_relay::message_config::{ConfigStore, Field, FieldSettings, MessageConfig};
use request_relay::overseerr::{MediaDetails, MediaKind};
use request_relay::render::render_message;
use request_relay::telegram::approval_keyboard;

fn config_enabling(fields: &[&str]) -> MessageConfig {
    let mut config = MessageConfig::built_in_default();
    config.message_format.enabled_fields = fields.iter().map(|s| s.to_string()).collect();
    config.message_format.field_order = fields.iter().map(|s| s.to_string()).collect();
    for name in fields {
        config
            .message_format
            .field_settings
            .entry(name.to_string())
            .or_insert_with(FieldSettings::default)
            .enabled = true;
    }
    config
}

mod notification_rendering {
    use super::*;

    const MEDIA_PENDING: &str = r#"{
        "notification_type": "MEDIA_PENDING",
        "media": {"media_type": "movie", "tmdbId": 550},
        "image": "https://image.tmdb.org/t/p/w600/poster.jpg",
        "request": {"request_id": 12, "requestedBy_username": "alice"}
    }"#;

    const FIGHT_CLUB: &str = r#"{
        "id": 550,
        "title": "Fight Club",
        "releaseDate": "1999-10-15",
        "voteAverage": 8.4,
        "overview": "An insomniac office worker crosses paths with a soapmaker."
    }"#;

    /// A pending movie request renders the title with emoji and year, the
    /// TMDb rating line, and an approve/deny pair keyed by the request id.
    #[test]
    fn pending_movie_request_end_to_end() {
        let payload: WebhookPayload = serde_json::from_str(MEDIA_PENDING).unwrap();
        assert_eq!(payload.notification_type.as_deref(), Some("MEDIA_PENDING"));

        let media = payload.media.unwrap();
        let kind = media.media_type.as_deref().and_then(MediaKind::parse).unwrap();
        assert_eq!(kind, MediaKind::Movie);

        let details: MediaDetails = serde_json::from_str(FIGHT_CLUB).unwrap();
        let requester = payload.request.unwrap().requested_by_username;

        let config = config_enabling(&["title", "requester", "rating"]);
        let text = render_message(&config, &details, kind, requester.as_deref());

        assert!(text.contains("🎬 *Fight Club (1999)*"), "got: {text}");
        assert!(text.contains("8.4/10 (TMDb)"), "got: {text}");
        assert!(text.contains("Requested by: alice"), "got: {text}");

        let keyboard = approval_keyboard("12");
        let row = &keyboard["inline_keyboard"][0];
        assert_eq!(row[0]["callback_data"], "approve_12");
        assert_eq!(row[1]["callback_data"], "deny_12");
    }

    /// Field order in the rendered body follows the declared order, with a
    /// blank line between fragments.
    #[test]
    fn fragments_follow_declared_order() {
        let mut config = config_enabling(&["title", "requester", "rating"]);
        config.message_format.field_order = vec![
            "rating".to_string(),
            "title".to_string(),
            "requester".to_string(),
        ];

        let details: MediaDetails = serde_json::from_str(FIGHT_CLUB).unwrap();
        let text = render_message(&config, &details, MediaKind::Movie, Some("alice"));
        let parts: Vec<&str> = text.split("\n\n").collect();

        assert_eq!(parts[0], "*Rating:* 8.4/10 (TMDb)");
        assert_eq!(parts[1], "🎬 *Fight Club (1999)*");
        assert_eq!(parts[2], "Requested by: alice");
    }

    /// Rendered messages survive the round trip back through the callback
    /// router's context recovery.
    #[test]
    fn rendered_context_round_trips() {
        let details: MediaDetails = serde_json::from_str(FIGHT_CLUB).unwrap();

        let config = config_enabling(&["title", "requester"]);
        let text = render_message(&config, &details, MediaKind::Movie, Some("alice"));
        let (title, requester) = extract_context(&text);
        assert_eq!(title, "Fight Club (1999)");
        assert_eq!(requester, "alice");

        // Fallback message shape recovers through the marker path.
        let config = config_enabling(&[]);
        let text = render_message(&config, &details, MediaKind::Movie, Some("alice"));
        let (title, requester) = extract_context(&text);
        assert_eq!(title, "Fight Club");
        assert_eq!(requester, "alice");
    }

    /// Synopsis truncation keeps the total length at exactly max_length.
    #[test]
    fn synopsis_truncation_is_exact() {
        let mut config = config_enabling(&["synopsis"]);
        config
            .message_format
            .field_settings
            .get_mut("synopsis")
            .unwrap()
            .max_length = Some(40);

        let details = MediaDetails {
            overview: Some("x".repeat(200)),
            ..Default::default()
        };
        let text = render_message(&config, &details, MediaKind::Movie, None);
        let body = text.strip_prefix("*Synopsis:* ").unwrap();
        assert_eq!(body.chars().count(), 40);
        assert!(body.ends_with("..."));
    }
}

mod authorization {
    use request_relay::auth::{
        generate_password_hash, AuthStore, LoginOutcome, LOGIN_ATTEMPT_LIMIT,
    };

    fn store() -> (AuthStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store =
            AuthStore::load(dir.path().join("admins.json"), dir.path().join("users.json"));
        (store, dir)
    }

    /// A presser in neither set is unauthorized; the callback router checks
    /// this before touching the approval client.
    #[tokio::test]
    async fn stranger_is_never_authorized() {
        let (store, _dir) = store();
        store.add_admin(1).await.unwrap();
        store.add_user(2).await.unwrap();
        assert!(!store.is_authorized(999).await);
    }

    #[tokio::test]
    async fn lockout_applies_before_password_comparison() {
        let (store, _dir) = store();
        let hash = generate_password_hash("correct horse").unwrap();

        for _ in 0..LOGIN_ATTEMPT_LIMIT {
            assert_eq!(
                store.attempt_login(7, "battery staple", &hash).await,
                LoginOutcome::BadPassword
            );
        }
        // Sixth attempt is rejected regardless of correctness.
        assert_eq!(
            store.attempt_login(7, "correct horse", &hash).await,
            LoginOutcome::RateLimited
        );
        assert!(store.is_rate_limited(7));
        assert!(!store.is_admin(7).await);
    }

    #[tokio::test]
    async fn successful_login_is_durable() {
        let dir = tempfile::tempdir().unwrap();
        let admins = dir.path().join("admins.json");
        let users = dir.path().join("users.json");
        let hash = generate_password_hash("hunter2").unwrap();

        {
            let store = AuthStore::load(&admins, &users);
            assert_eq!(
                store.attempt_login(7, "hunter2", &hash).await,
                LoginOutcome::Accepted
            );
        }

        let reloaded = AuthStore::load(&admins, &users);
        assert!(reloaded.is_admin(7).await);
    }
}

mod callback_resolution {
    use request_relay::auth::AuthStore;
    use request_relay::handlers::{
        decide_callback, resolution_update, CallbackDecision, ResolutionUpdate,
    };
    use request_relay::overseerr::Action;

    /// A press from someone in neither identity set is rejected outright; the
    /// decision carries nothing for the approval client to act on.
    #[tokio::test]
    async fn stranger_press_never_reaches_the_approval_client() {
        let dir = tempfile::tempdir().unwrap();
        let store =
            AuthStore::load(dir.path().join("admins.json"), dir.path().join("users.json"));
        store.add_admin(1).await.unwrap();

        let authorized = store.is_authorized(999).await;
        assert_eq!(
            decide_callback(Some("approve_12"), authorized),
            CallbackDecision::Reject
        );
        assert_eq!(
            decide_callback(Some("deny_12"), authorized),
            CallbackDecision::Reject
        );
    }

    #[test]
    fn authorized_press_resolves_the_parsed_action() {
        assert_eq!(
            decide_callback(Some("deny_12"), true),
            CallbackDecision::Resolve {
                action: Action::Deny,
                request_id: "12".to_string(),
            }
        );
        // Unparseable payloads are acknowledged and dropped regardless of who
        // pressed.
        assert_eq!(decide_callback(Some("garbage"), true), CallbackDecision::Ignore);
        assert_eq!(decide_callback(None, true), CallbackDecision::Ignore);
    }

    /// Successful approval replaces the request message with an announcement
    /// naming the recovered title, requester and the deciding admin.
    #[test]
    fn successful_approval_replaces_the_message() {
        let update = resolution_update(
            Action::Approve,
            true,
            "Fight Club (1999)",
            "alice",
            "Bob",
            Some(true),
        );
        assert_eq!(
            update,
            ResolutionUpdate::Replace {
                announcement:
                    "✅ *Fight Club (1999)* (requested by alice) was approved by Bob."
                        .to_string(),
            }
        );
    }

    /// A failed deny edits the original message in place: the caption path is
    /// taken for photo messages, the text path otherwise, and either edit
    /// drops the keyboard.
    #[test]
    fn failed_deny_edits_the_message_in_place() {
        let text = "❌ Failed to deny *Fight Club (1999)*. \
                    There might be an issue with the request service."
            .to_string();

        assert_eq!(
            resolution_update(Action::Deny, false, "Fight Club (1999)", "alice", "Bob", Some(true)),
            ResolutionUpdate::EditCaption { text: text.clone() }
        );
        assert_eq!(
            resolution_update(Action::Deny, false, "Fight Club (1999)", "alice", "Bob", Some(false)),
            ResolutionUpdate::EditText { text }
        );
        // No message attached means there is nothing to mutate.
        assert_eq!(
            resolution_update(Action::Deny, false, "Fight Club (1999)", "alice", "Bob", None),
            ResolutionUpdate::Leave
        );
    }
}

mod configuration {
    use super::*;
    use std::time::{Duration, SystemTime};

    #[test]
    fn store_synthesizes_and_persists_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("message_config.yml");

        let store = ConfigStore::load(&path);
        assert!(path.exists());
        assert_eq!(
            store.snapshot().enabled_fields_in_order(),
            vec![Field::Picture, Field::Title, Field::Requester]
        );
    }

    #[test]
    fn update_check_reloads_once_per_change() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("message_config.yml");
        let store = ConfigStore::load(&path);

        // Unchanged file: nothing to do.
        assert!(!store.check_for_updates());

        let mut config = MessageConfig::built_in_default();
        config.settings.debug_mode = true;
        std::fs::write(&path, serde_yaml::to_string(&config).unwrap()).unwrap();
        // Force the mtime forward so the change is visible regardless of
        // filesystem timestamp granularity.
        let file = std::fs::File::options().write(true).open(&path).unwrap();
        file.set_modified(SystemTime::now() + Duration::from_secs(5))
            .unwrap();

        assert!(store.check_for_updates());
        assert!(store.snapshot().is_debug_mode());
        assert!(!store.check_for_updates());
    }

    #[test]
    fn malformed_edit_keeps_last_good_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("message_config.yml");
        let store = ConfigStore::load(&path);

        std::fs::write(&path, "message_format: [unclosed").unwrap();
        let file = std::fs::File::options().write(true).open(&path).unwrap();
        file.set_modified(SystemTime::now() + Duration::from_secs(5))
            .unwrap();

        assert!(!store.check_for_updates());
        // Snapshot still serves the last good configuration.
        assert!(store.snapshot().is_field_enabled(Field::Title));
    }
}
