//! Device routes: `/API/{family}/{endpoint}`.
//!
//! Query-string families (Pico, Zymatic, PicoFerm) call with GET, JSON
//! families (ZSeries, iSpindel) POST their body. The firmware check is a GET
//! for every family.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use brewlink_protocol::family::FirmwareParams;
use brewlink_protocol::{
    Command, DeviceFamily, Endpoint, FirmwareQuery, ISpindelParams, PicoFermParams, PicoParams,
    ProtocolError, Reply, VerbKind, ZSeriesParams, ZymaticParams,
};
use libbrewlink::BrewError;
use serde::de::DeserializeOwned;

use crate::AppState;
use crate::error::{ApiError, device_error, reply_response};

/// Hint given to devices that call before recovery has finished.
pub const NOT_READY_RETRY_MS: u64 = 1_000;

pub async fn handle(
    State(state): State<Arc<AppState>>,
    Path((family, endpoint)): Path<(String, String)>,
    method: Method,
    uri: Uri,
    body: Bytes,
) -> Response {
    let family: DeviceFamily = match family.parse() {
        Ok(family) => family,
        Err(e) => return ApiError::from(e).into_response(),
    };

    match answer(&state, family, &endpoint, &method, &uri, &body).await {
        Ok(reply) => reply_response(StatusCode::OK, family.render(&reply)),
        Err(e) => device_error(family, &e),
    }
}

async fn answer(
    state: &AppState,
    family: DeviceFamily,
    endpoint: &str,
    method: &Method,
    uri: &Uri,
    body: &[u8],
) -> Result<Reply, BrewError> {
    match endpoint.parse::<Endpoint>()? {
        Endpoint::Firmware => {
            let query = firmware_query(family, uri)?;
            Ok(state.dispatcher().check_firmware(&query))
        }
        Endpoint::Verb(verb) => {
            if !state.is_ready() {
                return Err(BrewError::Busy {
                    retry_after_ms: NOT_READY_RETRY_MS,
                });
            }
            let command = parse_command(family, verb, method, uri, body)?;
            state.dispatcher().dispatch(command).await
        }
    }
}

fn parse_command(
    family: DeviceFamily,
    verb: VerbKind,
    method: &Method,
    uri: &Uri,
    body: &[u8],
) -> Result<Command, ProtocolError> {
    let command = match family {
        DeviceFamily::Pico => {
            expect_method(method, Method::GET)?;
            query::<PicoParams>(uri)?.into_command(verb)?
        }
        DeviceFamily::Zymatic => {
            expect_method(method, Method::GET)?;
            query::<ZymaticParams>(uri)?.into_command(verb)?
        }
        DeviceFamily::PicoFerm => {
            expect_method(method, Method::GET)?;
            query::<PicoFermParams>(uri)?.into_command(verb)?
        }
        DeviceFamily::ZSeries => {
            expect_method(method, Method::POST)?;
            json::<ZSeriesParams>(body)?.into_command(verb)?
        }
        DeviceFamily::ISpindel => {
            expect_method(method, Method::POST)?;
            json::<ISpindelParams>(body)?.into_command(verb)?
        }
    };
    Ok(command)
}

fn firmware_query(family: DeviceFamily, uri: &Uri) -> Result<FirmwareQuery, ProtocolError> {
    match family {
        DeviceFamily::Pico => query::<PicoParams>(uri)?.firmware_query(),
        DeviceFamily::Zymatic => query::<ZymaticParams>(uri)?.firmware_query(),
        DeviceFamily::PicoFerm => query::<PicoFermParams>(uri)?.firmware_query(),
        DeviceFamily::ZSeries | DeviceFamily::ISpindel => {
            query::<FirmwareParams>(uri)?.into_query(family)
        }
    }
}

fn expect_method(actual: &Method, expected: Method) -> Result<(), ProtocolError> {
    if *actual == expected {
        Ok(())
    } else {
        Err(ProtocolError::InvalidField {
            field: "method",
            reason: format!("expected {expected}"),
        })
    }
}

fn query<T: DeserializeOwned>(uri: &Uri) -> Result<T, ProtocolError> {
    Query::<T>::try_from_uri(uri)
        .map(|Query(params)| params)
        .map_err(|e| ProtocolError::InvalidField {
            field: "query",
            reason: e.body_text(),
        })
}

/// An empty body deserializes as no fields at all.
fn json<T: DeserializeOwned + Default>(body: &[u8]) -> Result<T, ProtocolError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body).map_err(|e| ProtocolError::InvalidField {
        field: "body",
        reason: e.to_string(),
    })
}
