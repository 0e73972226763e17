//! Remote-desktop logon-failure source.
//!
//! The security audit channel reports a failed logon with the target account
//! in property 5, the account's domain in property 6, and the network
//! address in property 19. The identity is composed as `domain\account`
//! when a domain is present, bare account otherwise.
//!
//! Copyright (c) 2026 CIPS Corps. All rights reserved.

use chrono::Utc;

use crate::log_sources::{LogSource, ParsedFailure, RawRecord};
use crate::{FenceError, FenceResult};

pub const SOURCE_NAME: &str = "rdp-logon";

const PROP_ACCOUNT: usize = 5;
const PROP_DOMAIN: usize = 6;
const PROP_ADDRESS: usize = 19;

pub struct RdpLogonSource;

impl LogSource for RdpLogonSource {
    fn name(&self) -> &'static str {
        SOURCE_NAME
    }

    fn parse(&self, record: &RawRecord) -> FenceResult<ParsedFailure> {
        let account = record.properties.get(PROP_ACCOUNT).ok_or_else(|| {
            FenceError::Parse(format!("{}: record has no account property", SOURCE_NAME))
        })?;
        let domain = record.properties.get(PROP_DOMAIN).ok_or_else(|| {
            FenceError::Parse(format!("{}: record has no domain property", SOURCE_NAME))
        })?;
        let raw_address = record.properties.get(PROP_ADDRESS).ok_or_else(|| {
            FenceError::Parse(format!("{}: record has no address property", SOURCE_NAME))
        })?;

        let identity = if domain.is_empty() {
            account.clone()
        } else {
            format!("{}\\{}", domain, account)
        };

        Ok(ParsedFailure {
            identity,
            raw_address: raw_address.clone(),
            timestamp: record.timestamp.unwrap_or_else(Utc::now),
        })
    }
}
