mod common;

use axum::http::StatusCode;
use serde_json::json;
use uuid::Uuid;

#[tokio::test]
async fn test_points_follow_speed_buckets() {
    let app = common::create_test_app();

    let cases = [
        (true, 1.0, 20),
        (true, 3.0, 17),
        (true, 7.0, 15),
        (true, 12.0, 13),
        (true, 20.0, 10),
        (false, 1.0, 0),
    ];
    for (is_correct, elapsed, expected) in cases {
        let (status, body) = common::send(
            &app,
            "POST",
            "/api/v1/quiz/points",
            None,
            Some(json!({ "isCorrect": is_correct, "elapsedSeconds": elapsed })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["points"], expected, "elapsed {}", elapsed);
    }
}

#[tokio::test]
async fn test_negative_elapsed_time_is_rejected() {
    let app = common::create_test_app();

    let (status, body) = common::send(
        &app,
        "POST",
        "/api/v1/quiz/points",
        None,
        Some(json!({ "isCorrect": true, "elapsedSeconds": -1.0 })),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["status"], 400);
}

#[tokio::test]
async fn test_grade_lookup_uses_inclusive_thresholds() {
    let app = common::create_test_app();

    let (status, body) = common::send(&app, "GET", "/api/v1/quiz/grades/1500", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["grade"]["name"], "Gardien");

    let (_, body) = common::send(&app, "GET", "/api/v1/quiz/grades/0", None, None).await;
    assert_eq!(body["grade"]["name"], "Novice");

    let (_, body) = common::send(&app, "GET", "/api/v1/quiz/grades", None, None).await;
    assert_eq!(body["grades"].as_array().unwrap().len(), 6);

    let (_, body) = common::send(&app, "GET", "/api/v1/quiz/badges", None, None).await;
    assert_eq!(body["badges"].as_array().unwrap().len(), 10);
}

#[tokio::test]
async fn test_session_requires_authentication() {
    let app = common::create_test_app();

    let (status, _) = common::send(&app, "POST", "/api/v1/quiz/sessions", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_full_quiz_session_flow() {
    let app = common::create_test_app();
    let user = format!("user-{}", Uuid::new_v4());
    let token = common::user_token(&user);

    let (status, body) =
        common::send(&app, "POST", "/api/v1/quiz/sessions", Some(&token), None).await;
    assert_eq!(status, StatusCode::CREATED);
    let session_id = body["sessionId"].as_str().unwrap().to_string();

    let answers_uri = format!("/api/v1/quiz/sessions/{}/answers", session_id);
    let (status, body) = common::send(
        &app,
        "POST",
        &answers_uri,
        Some(&token),
        Some(json!({ "questionId": "q1", "isCorrect": true, "elapsedSeconds": 1.2 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["points"], 20);

    // Replaying the same question keeps the original score.
    let (status, body) = common::send(
        &app,
        "POST",
        &answers_uri,
        Some(&token),
        Some(json!({ "questionId": "q1", "isCorrect": false, "elapsedSeconds": 30.0 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["points"], 20);
    assert_eq!(body["duplicate"], true);
    assert_eq!(body["sessionPoints"], 20);

    let complete_uri = format!("/api/v1/quiz/sessions/{}/complete", session_id);
    let (status, body) = common::send(&app, "POST", &complete_uri, Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["stats"]["totalPoints"], 20);
    assert_eq!(body["stats"]["totalQuizzes"], 1);
    assert_eq!(body["grade"]["name"], "Novice");
    let unlocked: Vec<&str> = body["newlyUnlocked"]
        .as_array()
        .unwrap()
        .iter()
        .map(|b| b["id"].as_str().unwrap())
        .collect();
    assert!(unlocked.contains(&"first_quiz"));

    let (status, _) = common::send(&app, "POST", &complete_uri, Some(&token), None).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, body) =
        common::send(&app, "GET", "/api/v1/quiz/progress", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["nextGrade"]["name"], "Explorateur");
    assert_eq!(body["pointsToNextGrade"], 180);
}

#[tokio::test]
async fn test_other_users_cannot_touch_a_session() {
    let app = common::create_test_app();
    let owner = common::user_token("owner");
    let intruder = common::user_token("intruder");

    let (_, body) = common::send(&app, "POST", "/api/v1/quiz/sessions", Some(&owner), None).await;
    let session_id = body["sessionId"].as_str().unwrap().to_string();

    let (status, body) = common::send(
        &app,
        "POST",
        &format!("/api/v1/quiz/sessions/{}/answers", session_id),
        Some(&intruder),
        Some(json!({ "questionId": "q1", "isCorrect": true, "elapsedSeconds": 1.0 })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["status"], 404);
}

#[tokio::test]
async fn test_weekly_rank_is_admin_only() {
    let app = common::create_test_app();
    let uri = "/admin/quiz/player-1/weekly-rank";

    let (status, _) = common::send(
        &app,
        "PUT",
        uri,
        Some(&common::user_token("player-1")),
        Some(json!({ "rank": 1 })),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = common::send(
        &app,
        "PUT",
        uri,
        Some(&common::admin_token()),
        Some(json!({ "rank": 2 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["bestWeeklyRank"], 2);
}
