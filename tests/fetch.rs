//! Resilient fetch tests against a mock portal.
//!
//! Exercises payload classification end to end, the single-retry auth
//! recovery, and date-window chunking with real HTTP round trips.

use std::time::Duration;

use serde_json::json;
use tempfile::TempDir;
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use krx_gate::{
    AutoLoginPolicy, Fetcher, Gateway, RequestError, RequestParams, SessionContext, SessionStore,
};

const DATA_API: &str = "/comm/bldAttendant/getJsonData.cmd";
const LOGIN_API: &str = "/contents/MDC/COMS/client/MDCCOMS001D1.cmd";
const TEMPLATE: &str = "dbms/MDC/STAT/standard/MDCSTAT01501";

const NO_AUTO_LOGIN: AutoLoginPolicy = AutoLoginPolicy {
    enabled: false,
    allow_dup_login: false,
};

const AUTO_LOGIN: AutoLoginPolicy = AutoLoginPolicy {
    enabled: true,
    allow_dup_login: false,
};

struct Harness {
    server: MockServer,
    fetcher: Fetcher,
    ctx: SessionContext,
    _dir: TempDir,
}

/// Fetcher wired to the mock server with an isolated context and store and
/// no inter-chunk delay.
async fn harness(policy: AutoLoginPolicy) -> Harness {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    let ctx = SessionContext::new();
    let fetcher = Fetcher::with_gateway(Gateway::new(server.uri()))
        .context(ctx.clone())
        .store(SessionStore::at(dir.path().join("session.json")))
        .auto_login(policy)
        .chunk_delay(Duration::ZERO);
    Harness {
        server,
        fetcher,
        ctx,
        _dir: dir,
    }
}

/// Mock a login flow that always succeeds.
async fn mount_working_login(server: &MockServer, expected_calls: u64) {
    Mock::given(method("POST"))
        .and(path(LOGIN_API))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"MBR_NO": "9000"})),
        )
        .expect(expected_calls)
        .mount(server)
        .await;
}

/// Auto-login inside `read` resolves credentials from the environment.
/// Every caller sets the same values, so parallel tests do not interfere.
fn set_autologin_env() {
    std::env::set_var("KRX_MBR_ID", "autologin-user");
    std::env::set_var("KRX_PASSWORD", "autologin-pw");
}

#[tokio::test]
async fn valid_output_is_returned_as_is() {
    let h = harness(NO_AUTO_LOGIN).await;

    Mock::given(method("POST"))
        .and(path(DATA_API))
        .and(body_string_contains("bld=dbms%2FMDC%2FSTAT%2Fstandard%2FMDCSTAT01501"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "output": [{"TRD_DD": "20240102", "TDD_CLSPRC": "71600"}],
            "CURRENT_DATETIME": "2024.01.02 PM 04:00:00"
        })))
        .expect(1)
        .mount(&h.server)
        .await;

    let data = h.fetcher.read(TEMPLATE, &RequestParams::new()).await.unwrap();
    assert_eq!(data["output"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn block_shaped_payload_is_accepted_without_retry() {
    let h = harness(AUTO_LOGIN).await;

    // No login mock mounted: a retry attempt would fail the test.
    Mock::given(method("POST"))
        .and(path(DATA_API))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "block1": [{"full_code": "KR7005930003", "codeName": "삼성전자"}]
        })))
        .expect(1)
        .mount(&h.server)
        .await;

    let data = h.fetcher.read(TEMPLATE, &RequestParams::new()).await.unwrap();
    assert!(data.get("block1").is_some());
}

#[tokio::test]
async fn empty_payload_triggers_one_relogin_and_retry() {
    let h = harness(AUTO_LOGIN).await;
    set_autologin_env();

    // First data request: ambiguous empty object.
    Mock::given(method("POST"))
        .and(path(DATA_API))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .up_to_n_times(1)
        .mount(&h.server)
        .await;

    mount_working_login(&h.server, 1).await;

    // Retry after re-login gets real data.
    Mock::given(method("POST"))
        .and(path(DATA_API))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"output": [{"row": 1}]})),
        )
        .expect(1)
        .mount(&h.server)
        .await;

    let data = h.fetcher.read(TEMPLATE, &RequestParams::new()).await.unwrap();
    assert_eq!(data["output"], json!([{"row": 1}]));
    assert!(h.ctx.is_active());
}

#[tokio::test]
async fn empty_payload_with_autologin_disabled_fails_immediately() {
    let h = harness(NO_AUTO_LOGIN).await;

    Mock::given(method("POST"))
        .and(path(DATA_API))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(1)
        .mount(&h.server)
        .await;

    let err = h
        .fetcher
        .read(TEMPLATE, &RequestParams::new())
        .await
        .unwrap_err();
    assert!(matches!(err, RequestError::UnexpectedPayload { .. }));
}

#[tokio::test]
async fn read_never_retries_more_than_once() {
    let h = harness(AUTO_LOGIN).await;
    set_autologin_env();

    // Data endpoint keeps failing validation even after re-login.
    Mock::given(method("POST"))
        .and(path(DATA_API))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(2)
        .mount(&h.server)
        .await;

    mount_working_login(&h.server, 1).await;

    let err = h
        .fetcher
        .read(TEMPLATE, &RequestParams::new())
        .await
        .unwrap_err();
    assert!(matches!(err, RequestError::UnexpectedPayload { .. }));
}

#[tokio::test]
async fn failed_relogin_surfaces_the_original_fetch_error() {
    let h = harness(AUTO_LOGIN).await;
    set_autologin_env();

    Mock::given(method("POST"))
        .and(path(DATA_API))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"output": "Please LOGIN"})),
        )
        .expect(1)
        .mount(&h.server)
        .await;

    Mock::given(method("POST"))
        .and(path(LOGIN_API))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"errorCode": "CD013"})),
        )
        .expect(1)
        .mount(&h.server)
        .await;

    let err = h
        .fetcher
        .read(TEMPLATE, &RequestParams::new())
        .await
        .unwrap_err();
    // The fetch-side classification, not the login failure.
    assert!(matches!(err, RequestError::AuthExpired));
}

#[tokio::test]
async fn explicit_error_code_is_a_server_error() {
    let h = harness(NO_AUTO_LOGIN).await;

    Mock::given(method("POST"))
        .and(path(DATA_API))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"ERR_CD": "900", "message": "오류"})),
        )
        .mount(&h.server)
        .await;

    let err = h
        .fetcher
        .read(TEMPLATE, &RequestParams::new())
        .await
        .unwrap_err();
    assert!(matches!(err, RequestError::ServerError { code } if code == "900"));
}

#[tokio::test]
async fn html_data_response_is_a_decode_error() {
    let h = harness(NO_AUTO_LOGIN).await;

    Mock::given(method("POST"))
        .and(path(DATA_API))
        .respond_with(ResponseTemplate::new(200).set_body_raw("<html>blocked</html>", "text/html"))
        .mount(&h.server)
        .await;

    let err = h
        .fetcher
        .read(TEMPLATE, &RequestParams::new())
        .await
        .unwrap_err();
    assert!(matches!(err, RequestError::PayloadDecode { .. }));
}

#[tokio::test]
async fn long_range_is_chunked_and_concatenated_in_order() {
    let h = harness(NO_AUTO_LOGIN).await;

    // 2020-01-01 .. 2024-06-01 splits into two full 730-day windows plus
    // the remainder, each window starting the day after the previous end.
    let chunks = [
        ("strtDd=20200101", "endDd=20211231", json!([{"d": "2020"}])),
        ("strtDd=20220101", "endDd=20240101", json!([{"d": "2022"}])),
        ("strtDd=20240102", "endDd=20240601", json!([{"d": "2024"}])),
    ];
    for (start, end, output) in &chunks {
        Mock::given(method("POST"))
            .and(path(DATA_API))
            .and(body_string_contains(*start))
            .and(body_string_contains(*end))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"output": output})),
            )
            .expect(1)
            .mount(&h.server)
            .await;
    }

    let mut params = RequestParams::new();
    params.insert("strtDd".into(), "20200101".into());
    params.insert("endDd".into(), "20240601".into());

    let data = h.fetcher.read(TEMPLATE, &params).await.unwrap();
    assert_eq!(
        data["output"],
        json!([{"d": "2020"}, {"d": "2022"}, {"d": "2024"}])
    );
}

#[tokio::test]
async fn short_range_issues_a_single_request() {
    let h = harness(NO_AUTO_LOGIN).await;

    Mock::given(method("POST"))
        .and(path(DATA_API))
        .and(body_string_contains("strtDd=20240101"))
        .and(body_string_contains("endDd=20240601"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"output": []})))
        .expect(1)
        .mount(&h.server)
        .await;

    let mut params = RequestParams::new();
    params.insert("strtDd".into(), "20240101".into());
    params.insert("endDd".into(), "20240601".into());

    h.fetcher.read(TEMPLATE, &params).await.unwrap();
}

#[tokio::test]
async fn inverted_range_is_rejected_without_any_request() {
    let h = harness(NO_AUTO_LOGIN).await;

    let mut params = RequestParams::new();
    params.insert("strtDd".into(), "20240601".into());
    params.insert("endDd".into(), "20240101".into());

    let err = h.fetcher.read(TEMPLATE, &params).await.unwrap_err();
    assert!(matches!(err, RequestError::InvalidParams { .. }));
    assert!(h.server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn endpoint_definitions_only_carry_a_template_id() {
    struct DailyTrades;

    impl krx_gate::Endpoint for DailyTrades {
        fn template_id(&self) -> &str {
            TEMPLATE
        }
    }

    let h = harness(NO_AUTO_LOGIN).await;

    Mock::given(method("POST"))
        .and(path(DATA_API))
        .and(body_string_contains("bld=dbms%2FMDC%2FSTAT%2Fstandard%2FMDCSTAT01501"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"output": []})))
        .expect(1)
        .mount(&h.server)
        .await;

    h.fetcher
        .read_endpoint(&DailyTrades, &RequestParams::new())
        .await
        .unwrap();
}

#[tokio::test]
async fn warm_start_restores_session_from_store() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    let store = SessionStore::at(dir.path().join("session.json"));

    // Another process left a fresh session record behind.
    let mut jar = krx_gate::session::CookieJar::new();
    jar.store_set_cookie("JSESSIONID=warm42; Path=/");
    let session = krx_gate::Session::with_cookies(jar).unwrap();
    store.save(&session, Some("9000"), 30);

    Mock::given(method("POST"))
        .and(path(DATA_API))
        .and(header("cookie", "JSESSIONID=warm42"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"output": []})))
        .expect(1)
        .mount(&server)
        .await;

    let ctx = SessionContext::new();
    let fetcher = Fetcher::with_gateway(Gateway::new(server.uri()))
        .context(ctx.clone())
        .store(store)
        .auto_login(NO_AUTO_LOGIN);

    fetcher.read(TEMPLATE, &RequestParams::new()).await.unwrap();
    assert!(ctx.is_active());
}
