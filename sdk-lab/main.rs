//! FlagKit mobile client lab
//!
//! Walks a client through a sync and lifecycle session against an
//! in-process server stand-in.
//! Run with: cargo run --example sdk-lab

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use flagkit_mobile::http::{
    ApiFuture, GetEvaluationsRequest, GetEvaluationsResponse, RegisterEventsRequest,
    RegisterEventsResponse, UserEvaluations,
};
use flagkit_mobile::{
    ApiClient, Evaluation, EventStore, FlagKitClient, FlagKitOptions, Reason, ReasonType,
    SqliteStore, User,
};

const PASS: &str = "\x1b[32m[PASS]\x1b[0m";
const FAIL: &str = "\x1b[31m[FAIL]\x1b[0m";

/// Serves one full snapshot, then a delta archiving `lab-string`.
#[derive(Default)]
struct LabApi {
    fetches: Mutex<u32>,
    sent_events: Mutex<usize>,
}

fn lab_evaluation(user_id: &str, feature_id: &str, version: i32, value: &str) -> Evaluation {
    Evaluation {
        id: Evaluation::make_id(feature_id, version, user_id),
        feature_id: feature_id.to_string(),
        feature_version: version,
        user_id: user_id.to_string(),
        variation_id: format!("{}-v{}", feature_id, version),
        variation_name: value.to_string(),
        variation_value: value.to_string(),
        reason: Reason::new(ReasonType::Rule),
    }
}

impl ApiClient for LabApi {
    fn get_evaluations(
        &self,
        request: GetEvaluationsRequest,
        _timeout: Duration,
    ) -> ApiFuture<'_, GetEvaluationsResponse> {
        let mut fetches = self.fetches.lock();
        *fetches += 1;
        let user_id = request.user.id;

        let evaluations = if *fetches == 1 {
            UserEvaluations {
                id: "lab-1".to_string(),
                evaluations: vec![
                    lab_evaluation(&user_id, "lab-bool", 1, "true"),
                    lab_evaluation(&user_id, "lab-string", 1, "Hello Lab"),
                    lab_evaluation(&user_id, "lab-number", 1, "42"),
                    lab_evaluation(&user_id, "lab-json", 1, r#"{"nested":true,"count":100}"#),
                ],
                created_at: "1700000000".to_string(),
                force_update: true,
                archived_feature_ids: Vec::new(),
            }
        } else {
            UserEvaluations {
                id: "lab-2".to_string(),
                evaluations: vec![lab_evaluation(&user_id, "lab-number", 2, "43")],
                created_at: "1700000600".to_string(),
                force_update: false,
                archived_feature_ids: vec!["lab-string".to_string()],
            }
        };
        let cursor = evaluations.id.clone();

        Box::pin(async move {
            Ok(GetEvaluationsResponse {
                evaluations,
                user_evaluations_id: cursor,
                size_bytes: 512,
            })
        })
    }

    fn register_events(
        &self,
        request: RegisterEventsRequest,
        _timeout: Duration,
    ) -> ApiFuture<'_, RegisterEventsResponse> {
        *self.sent_events.lock() += request.events.len();
        Box::pin(async { Ok(RegisterEventsResponse::default()) })
    }
}

#[tokio::main]
async fn main() {
    println!("=== FlagKit Mobile Client Lab ===\n");

    let mut passed = 0;
    let mut failed = 0;

    macro_rules! pass {
        ($test:expr) => {{
            println!("{} {}", PASS, $test);
            passed += 1;
        }};
    }

    macro_rules! fail {
        ($test:expr) => {{
            println!("{} {}", FAIL, $test);
            failed += 1;
        }};
    }

    println!("Testing initialization...");
    let options = FlagKitOptions::builder("sdk_lab_key", "https://api.example.com", "lab").build();
    let store = match SqliteStore::open_in_memory() {
        Ok(store) => Arc::new(store),
        Err(e) => {
            fail!(format!("Store - {}", e));
            print_summary(passed, failed);
            std::process::exit(1);
        }
    };
    let api = Arc::new(LabApi::default());

    let client = match FlagKitClient::builder(options, User::new("lab-user"))
        .api(api.clone())
        .evaluation_store(store.clone())
        .event_store(store.clone())
        .build()
    {
        Ok(client) => client,
        Err(e) => {
            fail!(format!("Build - {}", e));
            print_summary(passed, failed);
            std::process::exit(1);
        }
    };

    match client.initialize(Duration::from_secs(3)).wait().await {
        Some(Ok(())) => pass!("initialize()"),
        Some(Err(e)) => fail!(format!("initialize() - {}", e)),
        None => fail!("initialize() - superseded"),
    }

    println!("\nTesting variations...");
    if client.bool_variation("lab-bool", false) {
        pass!("bool_variation()");
    } else {
        fail!("bool_variation() - expected true");
    }

    let string_value = client.string_variation("lab-string", "");
    if string_value == "Hello Lab" {
        pass!("string_variation()");
    } else {
        fail!(format!("string_variation() - got '{}'", string_value));
    }

    let number_value = client.int_variation("lab-number", 0);
    if number_value == 42 {
        pass!("int_variation()");
    } else {
        fail!(format!("int_variation() - expected 42, got {}", number_value));
    }

    let json_value = client.json_variation("lab-json", serde_json::json!({}));
    if json_value.get("count").and_then(|c| c.as_i64()) == Some(100) {
        pass!("json_variation()");
    } else {
        fail!(format!("json_variation() - unexpected value: {}", json_value));
    }

    if client.bool_variation("non-existent", true) {
        pass!("Default value for missing flag");
    } else {
        fail!("Missing flag - expected default true");
    }

    println!("\nTesting differential sync...");
    let mut attributes = HashMap::new();
    attributes.insert("plan".to_string(), "premium".to_string());
    if let Err(e) = client.update_user_attributes(attributes) {
        fail!(format!("update_user_attributes() - {}", e));
    }

    match client.fetch_evaluations(None).wait().await {
        Some(Ok(())) => {
            let archived = client.evaluation_details("lab-string").is_none();
            let updated = client.int_variation("lab-number", 0) == 43;
            if archived && updated {
                pass!("fetch_evaluations() applied delta");
            } else {
                fail!("fetch_evaluations() - delta not applied");
            }
        }
        other => fail!(format!("fetch_evaluations() - {:?}", other.map(|r| r.is_ok()))),
    }

    println!("\nTesting event delivery...");
    client.track("lab_verification", 1.0);
    match client.flush().wait().await {
        Some(Ok(())) => pass!("flush()"),
        other => fail!(format!("flush() - {:?}", other.map(|r| r.is_ok()))),
    }
    match store.count() {
        Ok(0) => pass!(format!("Event queue drained ({} sent)", *api.sent_events.lock())),
        Ok(n) => fail!(format!("Event queue - {} events left", n)),
        Err(e) => fail!(format!("Event queue - {}", e)),
    }

    println!("\nTesting lifecycle...");
    client.on_background();
    client.on_foreground();
    client.destroy();
    if client.is_destroyed() {
        pass!("destroy()");
    } else {
        fail!("destroy() - client still active");
    }

    print_summary(passed, failed);

    if failed > 0 {
        println!("\n\x1b[31mSome verifications failed!\x1b[0m");
        std::process::exit(1);
    } else {
        println!("\n\x1b[32mAll verifications passed!\x1b[0m");
        std::process::exit(0);
    }
}

fn print_summary(passed: i32, failed: i32) {
    println!("\n{}", "=".repeat(40));
    println!("Results: {} passed, {} failed", passed, failed);
    println!("{}", "=".repeat(40));
}
