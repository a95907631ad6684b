//! Typed session commands for `POST /command`.
//!
//! Ad-hoc access to session operations that have no dedicated endpoint.
//! The body names the operation and its parameters:
//!
//! ```json
//! {"method": "contractDetails", "params": {"conId": 265598}}
//! ```
//!
//! and the response echoes both next to the result.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use upstream::{HistoricalRequest, InstrumentId, UpstreamSession};

/// One request-response operation on the upstream session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", content = "params", rename_all = "camelCase")]
pub enum SessionCommand {
    ManagedAccounts,
    Positions {
        account: String,
    },
    MatchingSymbols {
        pattern: String,
    },
    #[serde(rename_all = "camelCase")]
    ContractDetails {
        con_id: InstrumentId,
    },
    #[serde(rename_all = "camelCase")]
    HistoricalData {
        con_id: InstrumentId,
        request: HistoricalRequest,
    },
}

impl SessionCommand {
    pub fn name(&self) -> &'static str {
        match self {
            SessionCommand::ManagedAccounts => "managedAccounts",
            SessionCommand::Positions { .. } => "positions",
            SessionCommand::MatchingSymbols { .. } => "matchingSymbols",
            SessionCommand::ContractDetails { .. } => "contractDetails",
            SessionCommand::HistoricalData { .. } => "historicalData",
        }
    }
}

/// Run `command` and wrap its result as `{result, method, params}`.
pub async fn execute(session: &dyn UpstreamSession, command: &SessionCommand) -> Result<Value> {
    let result = match command {
        SessionCommand::ManagedAccounts => serde_json::to_value(session.managed_accounts().await?)?,
        SessionCommand::Positions { account } => {
            serde_json::to_value(session.positions(account).await?)?
        }
        SessionCommand::MatchingSymbols { pattern } => {
            serde_json::to_value(session.matching_symbols(pattern).await?)?
        }
        SessionCommand::ContractDetails { con_id } => {
            serde_json::to_value(session.contract_details(*con_id).await?)?
        }
        SessionCommand::HistoricalData { con_id, request } => match session.resolve(*con_id).await? {
            Some(instrument) => serde_json::to_value(session.historical_bars(&instrument, request).await?)?,
            None => json!([]),
        },
    };

    let params = match serde_json::to_value(command)? {
        Value::Object(mut fields) => fields.remove("params").unwrap_or(Value::Null),
        _ => Value::Null,
    };
    Ok(json!({
        "result": result,
        "method": command.name(),
        "params": params,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use upstream::{SimConfig, SimulatedSession};

    async fn connected() -> SimulatedSession {
        let session = SimulatedSession::new(SimConfig {
            tick_interval: None,
            ..SimConfig::default()
        });
        session.connect().await.unwrap();
        session
    }

    #[test]
    fn test_parse_commands() {
        let command: SessionCommand =
            serde_json::from_value(json!({"method": "contractDetails", "params": {"conId": 4391}}))
                .unwrap();
        assert_eq!(command, SessionCommand::ContractDetails { con_id: 4391 });

        let command: SessionCommand = serde_json::from_value(json!({"method": "managedAccounts"})).unwrap();
        assert_eq!(command, SessionCommand::ManagedAccounts);

        let command: SessionCommand = serde_json::from_value(json!({
            "method": "historicalData",
            "params": {"conId": 4391, "request": {"duration": "1 D", "barSize": "1 hour"}}
        }))
        .unwrap();
        match command {
            SessionCommand::HistoricalData { request, .. } => {
                assert_eq!(request.end_date_time, "");
                assert!(request.use_rth);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_unknown_method_is_rejected() {
        assert!(serde_json::from_value::<SessionCommand>(json!({"method": "placeOrder"})).is_err());
    }

    #[tokio::test]
    async fn test_execute_echoes_method_and_params() {
        let session = connected().await;
        let command = SessionCommand::MatchingSymbols {
            pattern: "MSFT".to_string(),
        };
        let response = execute(&session, &command).await.unwrap();
        assert_eq!(response["method"], "matchingSymbols");
        assert_eq!(response["params"], json!({"pattern": "MSFT"}));
        assert_eq!(response["result"][0]["contract"]["conId"], 272093);
    }

    #[tokio::test]
    async fn test_execute_unit_command() {
        let session = connected().await;
        let response = execute(&session, &SessionCommand::ManagedAccounts).await.unwrap();
        assert_eq!(response["result"], json!(["DU0000001"]));
        assert_eq!(response["params"], Value::Null);
    }

    #[tokio::test]
    async fn test_execute_disconnected() {
        let session = SimulatedSession::new(SimConfig::default());
        let err = execute(&session, &SessionCommand::ManagedAccounts).await.unwrap_err();
        assert!(err.is_disconnected());
    }
}
