//! End-to-end HTTP scenarios against the full router.

mod common;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use serde_json::{json, Value};
use tower::ServiceExt;

use agora::api::router;
use agora::polls::AudienceRules;

use common::{
    active_referendum, bearer_token, enroll_user, new_device, test_ctx, vote_attestation,
};

async fn body_json(resp: axum::response::Response) -> Value {
    let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn happy_vote_then_duplicate_conflict() {
    let ctx = test_ctx().await;
    let app = router(ctx.clone());

    let device = new_device("dev-1");
    let user = enroll_user(&ctx, &device, "pn-1", "F", 1990, &["reg_tbilisi"]).await;
    let rules = AudienceRules {
        regions: ["reg_tbilisi".to_string()].into_iter().collect(),
        min_age: Some(18),
        ..Default::default()
    };
    let (poll_id, option_ids) = active_referendum(&ctx, rules).await;
    let token = bearer_token(&ctx, &user);

    // Challenge issuance works over HTTP.
    let resp = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/v1/auth/challenge")
                .header("content-type", "application/json")
                .body(Body::from(
                    json!({"deviceId": "dev-1", "purpose": "vote"}).to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let challenge = body_json(resp).await;
    assert!(challenge["nonce"].as_str().unwrap().len() == 32);

    // Ballot accepted.
    let (attestation, bucket) = vote_attestation(&ctx, &device, &poll_id, &option_ids[0]);
    let vote_body = json!({
        "deviceId": "dev-1",
        "optionId": option_ids[0],
        "attestation": attestation,
        "timestampBucket": bucket,
    });
    let resp = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(format!("/api/v1/polls/{poll_id}/vote"))
                .header("content-type", "application/json")
                .header("authorization", format!("Bearer {token}"))
                .body(Body::from(vote_body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let receipt = body_json(resp).await;
    assert_eq!(receipt["chainSeq"], 1);

    // Identical second submission: 409 ALREADY_VOTED.
    let (attestation, bucket) = vote_attestation(&ctx, &device, &poll_id, &option_ids[0]);
    let vote_body = json!({
        "deviceId": "dev-1",
        "optionId": option_ids[0],
        "attestation": attestation,
        "timestampBucket": bucket,
    });
    let resp = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(format!("/api/v1/polls/{poll_id}/vote"))
                .header("content-type", "application/json")
                .header("authorization", format!("Bearer {token}"))
                .body(Body::from(vote_body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CONFLICT);
    let error = body_json(resp).await;
    assert_eq!(error["error"]["code"], "ALREADY_VOTED");

    // Public chain head reflects the single accepted ballot.
    let resp = app
        .oneshot(
            Request::builder()
                .uri("/public/chain/head")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let head = body_json(resp).await;
    assert_eq!(head["seq"], 1);
}

#[tokio::test]
async fn ineligible_vote_rejected_without_rows() {
    let ctx = test_ctx().await;
    let app = router(ctx.clone());

    let device = new_device("dev-1");
    let user = enroll_user(&ctx, &device, "pn-1", "F", 1990, &["reg_tbilisi"]).await;
    let rules = AudienceRules {
        regions: ["reg_batumi".to_string()].into_iter().collect(),
        ..Default::default()
    };
    let (poll_id, option_ids) = active_referendum(&ctx, rules).await;
    let token = bearer_token(&ctx, &user);

    let (attestation, bucket) = vote_attestation(&ctx, &device, &poll_id, &option_ids[0]);
    let resp = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(format!("/api/v1/polls/{poll_id}/vote"))
                .header("content-type", "application/json")
                .header("authorization", format!("Bearer {token}"))
                .body(Body::from(
                    json!({
                        "deviceId": "dev-1",
                        "optionId": option_ids[0],
                        "attestation": attestation,
                        "timestampBucket": bucket,
                    })
                    .to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    let error = body_json(resp).await;
    assert_eq!(error["error"]["code"], "NOT_ELIGIBLE");

    assert_eq!(
        agora::store::votes::nullifier_count(&ctx.pool, &poll_id)
            .await
            .unwrap(),
        0
    );
}

#[tokio::test]
async fn results_suppressed_below_k() {
    let ctx = test_ctx().await;
    let app = router(ctx.clone());
    let (poll_id, option_ids) = active_referendum(&ctx, AudienceRules::universe()).await;

    // 10 ballots, split 7/3, k = 30: everything suppressed.
    for i in 0..10 {
        let device = new_device(&format!("dev-{i}"));
        let user = enroll_user(&ctx, &device, &format!("pn-{i}"), "F", 1990, &["reg_tbilisi"]).await;
        let option = if i < 7 { &option_ids[0] } else { &option_ids[1] };
        let (attestation, bucket) = vote_attestation(&ctx, &device, &poll_id, option);
        ctx.pipeline
            .cast(
                &user,
                &poll_id,
                &agora::vote::VoteRequest {
                    device_id: device.device_id.clone(),
                    option_id: Some(option.clone()),
                    survey_response: None,
                    attestation,
                    ts_bucket: bucket,
                    proof: None,
                },
            )
            .await
            .unwrap();
    }

    let resp = app
        .oneshot(
            Request::builder()
                .uri(format!("/public/polls/{poll_id}/results"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let results = body_json(resp).await;
    assert_eq!(results["suppressed"], true);
    assert_eq!(results["total_votes"], 10);
    for option in results["options"].as_array().unwrap() {
        assert_eq!(option["cell"]["suppressed"], true);
        assert!(option["cell"].get("count").is_none());
    }
}

#[tokio::test]
async fn auth_required_on_protected_routes() {
    let ctx = test_ctx().await;
    let app = router(ctx);

    let resp = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/v1/polls")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    let resp = app
        .oneshot(
            Request::builder()
                .uri("/api/v1/polls")
                .header("authorization", "Bearer bogus")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn reenrollment_invalidates_old_session_token() {
    let ctx = test_ctx().await;
    let app = router(ctx.clone());

    let old_device = new_device("dev-old");
    let user = enroll_user(&ctx, &old_device, "pn-1", "F", 1990, &["reg_tbilisi"]).await;
    let old_token = bearer_token(&ctx, &user);

    // Re-enroll on a new device: thumbprint rotates.
    let new_device = new_device("dev-new");
    enroll_user(&ctx, &new_device, "pn-1", "F", 1990, &["reg_tbilisi"]).await;

    let resp = app
        .oneshot(
            Request::builder()
                .uri("/api/v1/polls")
                .header("authorization", format!("Bearer {old_token}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn admin_requires_api_key() {
    let ctx = test_ctx().await;
    let app = router(ctx.clone());

    let poll_body = json!({
        "title": "Admin poll",
        "type": "referendum",
        "startsAt": agora::db::now() + 60,
        "endsAt": agora::db::now() + 3600,
        "options": ["Yes", "No"],
    });

    let resp = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/v1/admin/polls")
                .header("content-type", "application/json")
                .body(Body::from(poll_body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    // Mint a key the way the CLI does, then retry.
    let key = "test-admin-key";
    let key_hash = ctx.registry.hash(&ctx.keys.api_key_hash, &[key]);
    agora::store::apikeys::insert(&ctx.pool, &key_hash, "test")
        .await
        .unwrap();

    let resp = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/v1/admin/polls")
                .header("content-type", "application/json")
                .header("x-api-key", key)
                .body(Body::from(poll_body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}
