use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio_util::codec::{Framed, LinesCodec, LinesCodecError};

use crate::engine::{parse_request, ReservationError, ReservationService};
use crate::limits::MAX_LINE_LEN;
use crate::model::Actor;

/// One request line. Fields other than the ones named here are ignored,
/// except for `create`, whose body is read by the request parser.
#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum WireRequest {
    Create {
        actor: Actor,
    },
    Delete {
        actor: Actor,
        #[serde(rename = "reservationId")]
        reservation_id: String,
    },
    Grid {
        date: String,
    },
    PurgeAll {
        actor: Actor,
    },
    PurgeUser {
        actor: Actor,
        #[serde(rename = "holderIdentity")]
        holder_identity: String,
    },
    List {
        actor: Actor,
    },
    Mine {
        actor: Actor,
    },
}

impl WireRequest {
    fn op(&self) -> &'static str {
        match self {
            WireRequest::Create { .. } => "create",
            WireRequest::Delete { .. } => "delete",
            WireRequest::Grid { .. } => "grid",
            WireRequest::PurgeAll { .. } => "purge_all",
            WireRequest::PurgeUser { .. } => "purge_user",
            WireRequest::List { .. } => "list",
            WireRequest::Mine { .. } => "mine",
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum Reply {
    Ok {
        ok: bool,
        data: Value,
    },
    Err {
        ok: bool,
        status: u16,
        code: &'static str,
        message: String,
    },
}

impl Reply {
    fn data<T: Serialize>(value: &T) -> Self {
        match serde_json::to_value(value) {
            Ok(data) => Reply::Ok { ok: true, data },
            Err(e) => Reply::from_error(&ReservationError::Unexpected(format!("response encoding failed: {e}"))),
        }
    }

    fn bad_request(message: impl Into<String>) -> Self {
        Reply::Err {
            ok: false,
            status: 400,
            code: "bad_request",
            message: message.into(),
        }
    }

    fn from_error(err: &ReservationError) -> Self {
        if let ReservationError::Unexpected(detail) = err {
            tracing::error!(%detail, "unexpected error");
        }
        Reply::Err {
            ok: false,
            status: err.status(),
            code: err.code(),
            message: err.public_message(),
        }
    }

    fn from_result<T: Serialize>(result: Result<T, ReservationError>) -> Self {
        match result {
            Ok(value) => Reply::data(&value),
            Err(e) => Reply::from_error(&e),
        }
    }

    fn encode(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            r#"{"ok":false,"status":500,"code":"internal","message":"unexpected server error"}"#.to_string()
        })
    }
}

async fn dispatch(service: &ReservationService, body: &Value, request: WireRequest) -> Reply {
    match request {
        WireRequest::Create { actor } => match parse_request(body) {
            Ok(req) => Reply::from_result(service.create_reservation(&req, &actor).await),
            Err(e) => Reply::from_error(&e),
        },
        WireRequest::Delete { actor, reservation_id } => {
            Reply::from_result(service.delete_reservation(&reservation_id, &actor).await)
        }
        WireRequest::Grid { date } => Reply::from_result(service.query_grid(&date).await),
        WireRequest::PurgeAll { actor } => Reply::from_result(service.purge_all(&actor).await),
        WireRequest::PurgeUser { actor, holder_identity } => {
            Reply::from_result(service.purge_user(&actor, &holder_identity).await)
        }
        WireRequest::List { actor } => Reply::from_result(service.list_reservations(&actor).await),
        WireRequest::Mine { actor } => Reply::from_result(service.my_reservations(&actor).await),
    }
}

/// Answer one request line with one response line (without the newline).
pub async fn handle_line(service: &ReservationService, line: &str) -> String {
    let body: Value = match serde_json::from_str(line) {
        Ok(v) => v,
        Err(e) => return Reply::bad_request(format!("malformed JSON: {e}")).encode(),
    };
    let request = match WireRequest::deserialize(&body) {
        Ok(r) => r,
        Err(e) => return Reply::bad_request(format!("malformed request: {e}")).encode(),
    };
    let op = request.op();
    let reply = dispatch(service, &body, request).await;
    if let Reply::Err { status, code, .. } = &reply {
        tracing::debug!(op, status, code, "request failed");
    }
    reply.encode()
}

/// Serve newline-delimited JSON requests until the peer hangs up.
pub async fn process_connection(socket: TcpStream, service: Arc<ReservationService>) -> Result<(), LinesCodecError> {
    let mut framed = Framed::new(socket, LinesCodec::new_with_max_length(MAX_LINE_LEN));
    while let Some(line) = framed.next().await {
        let reply = match line {
            Ok(line) if line.trim().is_empty() => continue,
            Ok(line) => handle_line(&service, &line).await,
            Err(LinesCodecError::MaxLineLengthExceeded) => {
                Reply::bad_request(format!("request line exceeds {MAX_LINE_LEN} bytes")).encode()
            }
            Err(e) => return Err(e),
        };
        framed.send(reply).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::engine::{ReservationRules, ReservationStore, RulePolicy};
    use crate::holiday::FixedHolidays;
    use crate::model::SpotDirectory;
    use crate::notify::NotifyHub;
    use chrono::NaiveDate;
    use serde_json::json;

    fn service() -> ReservationService {
        let rules = ReservationRules::new(
            Arc::new(SpotDirectory::default()),
            Arc::new(FixedHolidays::default()),
            RulePolicy::default(),
        );
        let today = NaiveDate::from_ymd_opt(2026, 10, 19).unwrap();
        ReservationService::new(
            rules,
            ReservationStore::in_memory(),
            Arc::new(FixedClock::new(today)),
            NotifyHub::disabled(),
        )
    }

    async fn call(svc: &ReservationService, request: Value) -> Value {
        let line = handle_line(svc, &request.to_string()).await;
        serde_json::from_str(&line).unwrap()
    }

    fn ana() -> Value {
        json!({"identity": "ana.perez@example.com", "name": "Ana Perez"})
    }

    #[tokio::test]
    async fn create_then_delete() {
        let svc = service();
        let created = call(
            &svc,
            json!({"op": "create", "actor": ana(), "spotId": 1, "date": "2026-10-20", "startTime": "14:00", "endTime": "15:00"}),
        )
        .await;
        assert_eq!(created["ok"], true);
        assert_eq!(created["data"]["gridDate"], "2026-10-20");
        assert_eq!(created["data"]["grid"]["spots"][0]["timeSlots"][28]["isReserved"], true);
        let id = created["data"]["reservation"]["id"].as_str().unwrap().to_string();

        let deleted = call(&svc, json!({"op": "delete", "actor": ana(), "reservationId": id})).await;
        assert_eq!(deleted["ok"], true);
        assert_eq!(deleted["data"]["grid"]["spots"][0]["timeSlots"][28]["isReserved"], false);
    }

    #[tokio::test]
    async fn errors_carry_status_and_code() {
        let svc = service();
        let reply = call(
            &svc,
            json!({"op": "create", "actor": ana(), "spotId": 1, "date": "2026-10-20", "startTime": "09:15", "endTime": "10:00"}),
        )
        .await;
        assert_eq!(reply, json!({
            "ok": false, "status": 400, "code": "misaligned_time",
            "message": "times must fall on 30-minute boundaries"
        }));

        let reply = call(&svc, json!({"op": "create", "actor": ana(), "date": "2026-10-20"})).await;
        assert_eq!(reply["code"], "missing_field");

        let reply = call(&svc, json!({"op": "delete", "actor": ana(), "reservationId": "nope"})).await;
        assert_eq!(reply["status"], 404);

        let reply = call(&svc, json!({"op": "list", "actor": ana()})).await;
        assert_eq!(reply["status"], 403);
        assert_eq!(reply["code"], "forbidden");
    }

    #[tokio::test]
    async fn malformed_lines_are_bad_requests() {
        let svc = service();
        for line in ["{not json", r#"{"op":"teleport"}"#, r#"{"op":"delete","reservationId":"x"}"#, "[]"] {
            let reply: Value = serde_json::from_str(&handle_line(&svc, line).await).unwrap();
            assert_eq!(reply["status"], 400, "{line}");
            assert_eq!(reply["code"], "bad_request");
        }
    }

    #[tokio::test]
    async fn grid_list_and_mine() {
        let svc = service();
        let grid = call(&svc, json!({"op": "grid", "date": "2026-10-21"})).await;
        assert_eq!(grid["data"]["date"], "2026-10-21");
        assert_eq!(grid["data"]["spots"].as_array().unwrap().len(), 27);

        call(
            &svc,
            json!({"op": "create", "actor": ana(), "spotId": 2, "date": "2026-10-20", "startTime": "08:00", "endTime": "09:00"}),
        )
        .await;
        let mine = call(&svc, json!({"op": "mine", "actor": ana()})).await;
        assert_eq!(mine["data"].as_array().unwrap().len(), 1);

        let admin = json!({"identity": "root@example.com", "name": "Root Admin", "role": "admin"});
        let all = call(&svc, json!({"op": "list", "actor": admin})).await;
        assert_eq!(all["data"][0]["spotId"], 2);

        let purged = call(&svc, json!({"op": "purge_user", "actor": admin, "holderIdentity": "ana.perez@example.com"})).await;
        assert_eq!(purged["data"]["removed"], 1);
        let purged = call(&svc, json!({"op": "purge_all", "actor": admin})).await;
        assert_eq!(purged["data"]["removed"], 0);
    }
}
