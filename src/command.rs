//! JSON command surface: one `op`-tagged request in, one [`OperationResult`] out.

use std::time::Instant;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::engine::{Engine, EngineError, ErrorKind};
use crate::lifecycle::{Approval, BookingUpdate, Cancellation, CheckIn, CheckOut, NewBooking};
use crate::model::{Booking, Intent, OverrideFlag, Outcome, SpaceType};
use crate::observability::{op_label, OPERATIONS_TOTAL, OPERATION_DURATION_SECONDS};
use crate::refund::RefundRequest;

fn one() -> u32 {
    1
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    CheckAvailability {
        space_type: SpaceType,
        date: NaiveDate,
        start: String,
        end: String,
        #[serde(default = "one")]
        capacity: u32,
    },
    FindOpenSlots {
        space_type: SpaceType,
        date: NaiveDate,
        duration_minutes: u32,
        #[serde(default = "one")]
        capacity: u32,
    },
    CalculatePrice {
        space_type: SpaceType,
        date: NaiveDate,
        start: String,
        end: String,
    },
    CreateBooking {
        actor: String,
        booking: NewBooking,
    },
    Approve {
        id: Ulid,
        actor: String,
        #[serde(default)]
        approval: Approval,
    },
    Reject {
        id: Ulid,
        actor: String,
        #[serde(default)]
        cancellation: Cancellation,
    },
    Cancel {
        id: Ulid,
        actor: String,
        #[serde(default)]
        cancellation: Cancellation,
    },
    Delete {
        id: Ulid,
        actor: String,
        #[serde(default)]
        cancellation: Cancellation,
    },
    CheckIn {
        id: Ulid,
        actor: String,
        #[serde(default)]
        check_in: CheckIn,
    },
    CheckOut {
        id: Ulid,
        actor: String,
        #[serde(default)]
        check_out: CheckOut,
    },
    MarkNoShow {
        id: Ulid,
        actor: String,
        #[serde(default)]
        cancellation: Cancellation,
    },
    UpdateBooking {
        id: Ulid,
        actor: String,
        update: BookingUpdate,
    },
    GetBooking {
        #[serde(default)]
        id: Option<Ulid>,
        #[serde(default)]
        booking_number: Option<String>,
    },
    ListBookings {
        space_type: SpaceType,
        date: NaiveDate,
    },
    QuoteRefund {
        id: Ulid,
        #[serde(default)]
        refund: Option<RefundRequest>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OperationResult {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub booking: Option<Booking>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason_code: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub override_flag: Option<OverrideFlag>,
    pub intents: Vec<Intent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl OperationResult {
    fn empty(ok: bool) -> Self {
        Self {
            ok,
            booking: None,
            error_kind: None,
            error_detail: None,
            reason_code: None,
            override_flag: None,
            intents: Vec::new(),
            data: None,
        }
    }

    pub fn failure(err: &EngineError) -> Self {
        Self {
            error_kind: Some(err.kind()),
            error_detail: Some(err.to_string()),
            reason_code: Some(err.reason_code()),
            override_flag: err.bypass(),
            ..Self::empty(false)
        }
    }

    pub fn malformed(detail: impl Into<String>) -> Self {
        Self {
            error_kind: Some(ErrorKind::MalformedRequest),
            error_detail: Some(detail.into()),
            reason_code: Some("malformed_request"),
            ..Self::empty(false)
        }
    }

    fn booking(result: Result<Booking, EngineError>) -> Self {
        match result {
            Ok(booking) => Self {
                booking: Some(booking),
                ..Self::empty(true)
            },
            Err(e) => Self::failure(&e),
        }
    }

    fn data<T: Serialize>(result: Result<T, EngineError>) -> Self {
        let value = match result {
            Ok(value) => value,
            Err(e) => return Self::failure(&e),
        };
        match serde_json::to_value(value) {
            Ok(data) => Self {
                data: Some(data),
                ..Self::empty(true)
            },
            Err(e) => Self {
                error_kind: Some(ErrorKind::Infrastructure),
                error_detail: Some(e.to_string()),
                reason_code: Some("serialization_failed"),
                ..Self::empty(false)
            },
        }
    }
}

impl From<Result<Outcome, EngineError>> for OperationResult {
    fn from(result: Result<Outcome, EngineError>) -> Self {
        match result {
            Ok(Outcome { booking, intents }) => Self {
                booking: Some(booking),
                intents,
                ..Self::empty(true)
            },
            Err(e) => Self::failure(&e),
        }
    }
}

/// Execute one request against the engine.
pub async fn dispatch(engine: &Engine, req: Request) -> OperationResult {
    let op = op_label(&req);
    let started = Instant::now();

    let result = match req {
        Request::CheckAvailability { space_type, date, start, end, capacity } => {
            OperationResult::data(engine.check_availability(space_type, date, &start, &end, capacity).await)
        }
        Request::FindOpenSlots { space_type, date, duration_minutes, capacity } => {
            OperationResult::data(engine.find_open_slots(space_type, date, duration_minutes, capacity).await)
        }
        Request::CalculatePrice { space_type, date, start, end } => {
            OperationResult::data(engine.calculate_price(space_type, date, &start, &end))
        }
        Request::CreateBooking { actor, booking } => engine.create_booking(booking, &actor).await.into(),
        Request::Approve { id, actor, approval } => engine.approve(id, approval, &actor).await.into(),
        Request::Reject { id, actor, cancellation } => engine.reject(id, cancellation, &actor).await.into(),
        Request::Cancel { id, actor, cancellation } => engine.cancel(id, cancellation, &actor).await.into(),
        Request::Delete { id, actor, cancellation } => engine.delete(id, cancellation, &actor).await.into(),
        Request::CheckIn { id, actor, check_in } => engine.check_in(id, check_in, &actor).await.into(),
        Request::CheckOut { id, actor, check_out } => engine.check_out(id, check_out, &actor).await.into(),
        Request::MarkNoShow { id, actor, cancellation } => engine.mark_no_show(id, cancellation, &actor).await.into(),
        Request::UpdateBooking { id, actor, update } => engine.update_booking(id, update, &actor).await.into(),
        Request::GetBooking { id, booking_number } => match (id, booking_number) {
            (Some(id), _) => OperationResult::booking(engine.get_booking(id).await),
            (None, Some(number)) => OperationResult::booking(engine.get_by_number(&number).await),
            (None, None) => OperationResult::malformed("get_booking needs id or booking_number"),
        },
        Request::ListBookings { space_type, date } => {
            OperationResult::data(Ok::<_, EngineError>(engine.list_bookings(space_type, date).await))
        }
        Request::QuoteRefund { id, refund } => OperationResult::data(engine.quote_refund(id, refund).await),
    };

    let status = if result.ok { "ok" } else { "error" };
    metrics::counter!(OPERATIONS_TOTAL, "op" => op, "status" => status).increment(1);
    metrics::histogram!(OPERATION_DURATION_SECONDS, "op" => op).record(started.elapsed().as_secs_f64());
    result
}

/// Parse one JSON line and dispatch it.
pub async fn dispatch_line(engine: &Engine, line: &str) -> OperationResult {
    match serde_json::from_str::<Request>(line) {
        Ok(req) => dispatch(engine, req).await,
        Err(e) => {
            tracing::debug!("malformed request: {e}");
            OperationResult::malformed(e.to_string())
        }
    }
}

/// Decode one raw input line and dispatch it. Blank lines yield nothing.
pub async fn dispatch_raw(engine: &Engine, raw: &[u8]) -> Option<OperationResult> {
    let line = match std::str::from_utf8(raw) {
        Ok(line) => line,
        Err(e) => return Some(OperationResult::malformed(format!("request is not UTF-8: {e}"))),
    };
    if line.trim().is_empty() {
        return None;
    }
    Some(dispatch_line(engine, line).await)
}
