//! Resilient data fetching.
//!
//! [`Fetcher::read`] performs one logical data read against the portal's
//! JSON endpoint, hiding two server-side quirks from the caller:
//!
//! - the 730-day window limit on date-ranged requests, handled by
//!   transparent chunking with the chunks concatenated in chronological
//!   order, and
//! - silent session expiry, handled by classifying each payload and, on a
//!   recoverable failure, re-logging-in and re-running the read exactly
//!   once.
//!
//! Per-endpoint definitions live outside this crate; they only carry a
//! template id ([`Endpoint`]) and call into `read`.

pub mod payload;

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::NaiveDate;
use serde_json::Value;
use tracing::{debug, warn};

use crate::auth::{Authenticator, LoginOptions};
use crate::config::{self, AutoLoginPolicy};
use crate::error::{snippet, RequestError, Result};
use crate::gateway::Gateway;
use crate::session::store::SessionStore;
use crate::session::{global_context, Session, SessionContext};

/// Maximum date span the data endpoint accepts in one request.
const WINDOW_DAYS: i64 = 730;

/// Courtesy delay between chunked requests, roughly two years of data per
/// second.
const DEFAULT_CHUNK_DELAY: Duration = Duration::from_secs(1);

/// Date format used by the portal's range fields.
const DATE_FORMAT: &str = "%Y%m%d";

/// Form field naming the server-side response template.
const TEMPLATE_FIELD: &str = "bld";

/// Range field names rewritten per chunk.
const START_DATE_FIELD: &str = "strtDd";
const END_DATE_FIELD: &str = "endDd";

/// Form parameters for one data request.
pub type RequestParams = BTreeMap<String, String>;

/// A per-endpoint data definition: just a template id. Everything else is
/// the fetcher's job.
pub trait Endpoint {
    fn template_id(&self) -> &str;
}

/// Whether this logical read has already burned its one recovery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RetryState {
    FirstAttempt,
    RetriedOnce,
}

/// Data-read client with date-window chunking and one-shot auth recovery.
#[derive(Debug, Clone)]
pub struct Fetcher {
    gateway: Gateway,
    ctx: SessionContext,
    store: SessionStore,
    authenticator: Authenticator,
    policy: Option<AutoLoginPolicy>,
    chunk_delay: Duration,
}

impl Default for Fetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Fetcher {
    /// Fetcher over the production portal, the process-wide session context
    /// and the environment-resolved session store.
    pub fn new() -> Self {
        Self::with_gateway(Gateway::default())
    }

    pub fn with_gateway(gateway: Gateway) -> Self {
        let store = SessionStore::from_env();
        Self {
            authenticator: Authenticator::new(gateway.clone(), store.clone()),
            gateway,
            ctx: global_context(),
            store,
            policy: None,
            chunk_delay: DEFAULT_CHUNK_DELAY,
        }
    }

    /// Use an explicit session context instead of the process-wide one.
    pub fn context(mut self, ctx: SessionContext) -> Self {
        self.ctx = ctx;
        self
    }

    /// Use an explicit session store instead of the environment-resolved
    /// location.
    pub fn store(mut self, store: SessionStore) -> Self {
        self.authenticator = Authenticator::new(self.gateway.clone(), store.clone());
        self.store = store;
        self
    }

    /// Override the process-wide auto-login policy for this fetcher.
    pub fn auto_login(mut self, policy: AutoLoginPolicy) -> Self {
        self.policy = Some(policy);
        self
    }

    /// Override the courtesy delay between chunked requests.
    pub fn chunk_delay(mut self, delay: Duration) -> Self {
        self.chunk_delay = delay;
        self
    }

    /// Perform one logical data read for `template_id` with `params`.
    ///
    /// If `params` carries a `strtDd`/`endDd` pair wider than the window
    /// limit, the read is split into multiple requests and the `output`
    /// lists are concatenated in ascending date order. On a validation
    /// failure the fetcher re-logs-in and re-runs the whole read at most
    /// once; if that login itself fails, the original fetch error is
    /// surfaced.
    pub async fn read(&self, template_id: &str, params: &RequestParams) -> Result<Value> {
        // Opportunistic warm start from the cross-process store.
        if !self.ctx.is_active() {
            if let Some(session) = self.store.load() {
                debug!("warm-starting session from disk");
                self.ctx.install(session);
            }
        }

        let policy = self.policy.unwrap_or_else(config::auto_login_policy);
        let mut attempt = RetryState::FirstAttempt;

        loop {
            match self.read_all_chunks(template_id, params).await {
                Ok(data) => return Ok(data),
                Err(e)
                    if e.triggers_relogin()
                        && policy.enabled
                        && attempt == RetryState::FirstAttempt =>
                {
                    warn!(error = %e, "data request failed, attempting re-login");
                    let opts = LoginOptions {
                        allow_dup_login: policy.allow_dup_login,
                        ..LoginOptions::default()
                    };
                    if let Err(login_err) = self.authenticator.login(&self.ctx, opts).await {
                        // Surface the fetch error; the login failure is
                        // secondary.
                        warn!(error = %login_err, "re-login failed");
                        return Err(e);
                    }
                    attempt = RetryState::RetriedOnce;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Read via an [`Endpoint`] definition.
    pub async fn read_endpoint<E: Endpoint>(&self, endpoint: &E, params: &RequestParams) -> Result<Value> {
        self.read(endpoint.template_id(), params).await
    }

    async fn read_all_chunks(&self, template_id: &str, params: &RequestParams) -> Result<Value> {
        let range = date_range_of(params)?;

        let Some((start, end)) = range else {
            return self.request_once(template_id, params.clone()).await;
        };

        let ranges = chunk_ranges(start, end, WINDOW_DAYS);
        debug!(
            start = %start,
            end = %end,
            chunks = ranges.len(),
            "date-ranged read"
        );

        let mut merged: Option<Value> = None;
        for (i, (chunk_start, chunk_end)) in ranges.iter().enumerate() {
            let mut chunk_params = params.clone();
            chunk_params.insert(
                START_DATE_FIELD.into(),
                chunk_start.format(DATE_FORMAT).to_string(),
            );
            chunk_params.insert(
                END_DATE_FIELD.into(),
                chunk_end.format(DATE_FORMAT).to_string(),
            );

            let data = self.request_once(template_id, chunk_params).await?;
            match merged.as_mut() {
                None => merged = Some(data),
                Some(acc) => append_output(acc, data)?,
            }

            if i + 1 < ranges.len() {
                tokio::time::sleep(self.chunk_delay).await;
            }
        }

        // `chunk_ranges` always yields at least one range for a valid pair.
        merged.ok_or_else(|| RequestError::InvalidParams {
            message: format!("empty date range {} > {}", start, end),
        })
    }

    async fn request_once(&self, template_id: &str, params: RequestParams) -> Result<Value> {
        // An explicit or warm-started session carries the auth cookies; with
        // none installed the request goes out cold and the validator decides.
        let session = match self.ctx.current() {
            Some(session) => session,
            None => Session::new()?,
        };

        let mut form: Vec<(String, String)> = params.into_iter().collect();
        form.push((TEMPLATE_FIELD.into(), template_id.to_string()));

        let response = session
            .post_form(
                &self.gateway.data_url(),
                &self.gateway.data_referer(),
                self.gateway.base(),
                &form,
            )
            .await?;

        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_lowercase();
        let body = response.text().await.unwrap_or_default();

        if status != 200 {
            return Err(RequestError::Transport {
                status,
                snippet: snippet(&body),
            });
        }

        let data = payload::decode_body(&body).ok_or_else(|| RequestError::PayloadDecode {
            content_type,
            snippet: snippet(&body),
        })?;

        payload::validate_data_payload(&data)?;
        Ok(data)
    }
}

/// Parse the request's date pair, if present.
///
/// Both fields must be present to trigger chunking; a malformed date or an
/// inverted range is a caller error, not a server failure.
fn date_range_of(params: &RequestParams) -> Result<Option<(NaiveDate, NaiveDate)>> {
    let (Some(start_raw), Some(end_raw)) =
        (params.get(START_DATE_FIELD), params.get(END_DATE_FIELD))
    else {
        return Ok(None);
    };

    let parse = |raw: &str| {
        NaiveDate::parse_from_str(raw, DATE_FORMAT).map_err(|_| RequestError::InvalidParams {
            message: format!("date '{}' is not in {} format", raw, DATE_FORMAT),
        })
    };
    let start = parse(start_raw)?;
    let end = parse(end_raw)?;

    if start > end {
        return Err(RequestError::InvalidParams {
            message: format!("start date {} is after end date {}", start, end),
        });
    }
    Ok(Some((start, end)))
}

/// Split `[start, end]` into window-sized request ranges.
///
/// Full windows span `window_days` inclusive of both ends; the next chunk
/// starts the day after the previous window's end date. This boundary
/// arithmetic mirrors the server's observed acceptance and is preserved
/// exactly.
fn chunk_ranges(start: NaiveDate, end: NaiveDate, window_days: i64) -> Vec<(NaiveDate, NaiveDate)> {
    let window = chrono::Duration::days(window_days);
    let one_day = chrono::Duration::days(1);

    let mut ranges = Vec::new();
    let mut cursor = start;
    while cursor + window < end {
        ranges.push((cursor, cursor + window));
        cursor = cursor + window + one_day;
    }
    if cursor <= end {
        ranges.push((cursor, end));
    }
    ranges
}

/// Append `chunk`'s `output` list onto the accumulated result.
fn append_output(merged: &mut Value, chunk: Value) -> Result<()> {
    let items = match chunk {
        Value::Object(mut map) => map.remove("output"),
        _ => None,
    };
    let Some(Value::Array(mut items)) = items else {
        return Err(RequestError::UnexpectedPayload {
            snippet: "chunked response carried no 'output' list".into(),
        });
    };

    let Some(Value::Array(acc)) = merged.get_mut("output") else {
        return Err(RequestError::UnexpectedPayload {
            snippet: "accumulated response carried no 'output' list".into(),
        });
    };
    acc.append(&mut items);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, DATE_FORMAT).unwrap()
    }

    #[test]
    fn short_range_is_a_single_chunk() {
        let ranges = chunk_ranges(date("20240101"), date("20240301"), WINDOW_DAYS);
        assert_eq!(ranges, vec![(date("20240101"), date("20240301"))]);

        // Exactly one window wide is still a single request.
        let end = date("20240101") + chrono::Duration::days(WINDOW_DAYS);
        assert_eq!(
            chunk_ranges(date("20240101"), end, WINDOW_DAYS),
            vec![(date("20240101"), end)]
        );
    }

    #[test]
    fn single_day_range() {
        let ranges = chunk_ranges(date("20240102"), date("20240102"), WINDOW_DAYS);
        assert_eq!(ranges, vec![(date("20240102"), date("20240102"))]);
    }

    #[test]
    fn chunks_are_contiguous_and_cover_the_range() {
        let start = date("20150101");
        let end = date("20240601");
        let ranges = chunk_ranges(start, end, WINDOW_DAYS);

        assert!(ranges.len() > 1);
        assert_eq!(ranges.first().unwrap().0, start);
        assert_eq!(ranges.last().unwrap().1, end);

        for window in ranges.windows(2) {
            let (_, prev_end) = window[0];
            let (next_start, _) = window[1];
            // Non-overlapping, no gap.
            assert_eq!(next_start, prev_end + chrono::Duration::days(1));
        }
        for (s, e) in &ranges {
            assert!(s <= e);
            assert!(*e - *s <= chrono::Duration::days(WINDOW_DAYS));
        }
    }

    #[test]
    fn full_windows_span_the_window_limit() {
        let start = date("20200101");
        let end = date("20240101");
        let ranges = chunk_ranges(start, end, WINDOW_DAYS);
        for (s, e) in &ranges[..ranges.len() - 1] {
            assert_eq!(*e - *s, chrono::Duration::days(WINDOW_DAYS));
        }
    }

    #[test]
    fn date_range_requires_both_fields() {
        let mut params = RequestParams::new();
        assert_eq!(date_range_of(&params).unwrap(), None);

        params.insert(START_DATE_FIELD.into(), "20240101".into());
        assert_eq!(date_range_of(&params).unwrap(), None);

        params.insert(END_DATE_FIELD.into(), "20240301".into());
        assert_eq!(
            date_range_of(&params).unwrap(),
            Some((date("20240101"), date("20240301")))
        );
    }

    #[test]
    fn inverted_or_malformed_ranges_are_rejected() {
        let mut params = RequestParams::new();
        params.insert(START_DATE_FIELD.into(), "20240301".into());
        params.insert(END_DATE_FIELD.into(), "20240101".into());
        assert!(matches!(
            date_range_of(&params).unwrap_err(),
            RequestError::InvalidParams { .. }
        ));

        params.insert(START_DATE_FIELD.into(), "2024-01-01".into());
        assert!(matches!(
            date_range_of(&params).unwrap_err(),
            RequestError::InvalidParams { .. }
        ));
    }

    #[test]
    fn append_output_concatenates_in_order() {
        let mut merged = json!({"output": [1, 2], "CURRENT_DATETIME": "x"});
        append_output(&mut merged, json!({"output": [3, 4]})).unwrap();
        append_output(&mut merged, json!({"output": [5]})).unwrap();
        assert_eq!(merged["output"], json!([1, 2, 3, 4, 5]));
    }

    #[test]
    fn append_output_rejects_non_list_chunks() {
        let mut merged = json!({"output": []});
        let err = append_output(&mut merged, json!({"OutBlock_1": []})).unwrap_err();
        assert!(matches!(err, RequestError::UnexpectedPayload { .. }));
    }
}
