//! Database-engine logon-failure source.
//!
//! The engine's audit channel reports a failed logon as a positional record:
//! the attempted login name in property 0 and the client address text in
//! property 2. The address text is free-form ("CLIENT: 203.0.113.9]", a
//! named pipe, or "<local machine>"), so attribution is the extractor's
//! problem, not this parser's.
//!
//! Copyright (c) 2026 CIPS Corps. All rights reserved.

use chrono::Utc;

use crate::log_sources::{LogSource, ParsedFailure, RawRecord};
use crate::{FenceError, FenceResult};

pub const SOURCE_NAME: &str = "mssql-logon";

const PROP_LOGIN: usize = 0;
const PROP_ADDRESS: usize = 2;

pub struct MssqlLogonSource;

impl LogSource for MssqlLogonSource {
    fn name(&self) -> &'static str {
        SOURCE_NAME
    }

    fn parse(&self, record: &RawRecord) -> FenceResult<ParsedFailure> {
        let login = record.properties.get(PROP_LOGIN).ok_or_else(|| {
            FenceError::Parse(format!("{}: record has no login property", SOURCE_NAME))
        })?;
        let raw_address = record.properties.get(PROP_ADDRESS).ok_or_else(|| {
            FenceError::Parse(format!("{}: record has no address property", SOURCE_NAME))
        })?;

        Ok(ParsedFailure {
            identity: login.clone(),
            raw_address: raw_address.clone(),
            timestamp: record.timestamp.unwrap_or_else(Utc::now),
        })
    }
}
