use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tower::Service;
use tracing::info;

use crate::config::{AccountConfig, MfaType, Site};
use crate::error::MeterError;
use crate::meter::{Meter, MeterReading};

/// One meter read request.
#[derive(Debug, Clone)]
pub struct ReadRequest {
    pub email: String,
    pub password: String,
    pub mfa_type: MfaType,
    pub mfa_secret: String,
    pub account_uuid: String,
    pub meter_number: String,
    pub account_number: Option<String>,
    pub site: Site,
    pub headless: bool,
}

impl ReadRequest {
    pub fn new(
        email: impl Into<String>,
        password: impl Into<String>,
        mfa_type: MfaType,
        mfa_secret: impl Into<String>,
        account_uuid: impl Into<String>,
        meter_number: impl Into<String>,
    ) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
            mfa_type,
            mfa_secret: mfa_secret.into(),
            account_uuid: account_uuid.into(),
            meter_number: meter_number.into(),
            account_number: None,
            site: Site::Coned,
            headless: true,
        }
    }

    pub fn with_site(mut self, site: Site) -> Self {
        self.site = site;
        self
    }

    pub fn with_account_number(mut self, account_number: impl Into<String>) -> Self {
        self.account_number = Some(account_number.into());
        self
    }

    pub fn with_headless(mut self, headless: bool) -> Self {
        self.headless = headless;
        self
    }
}

impl From<ReadRequest> for AccountConfig {
    fn from(req: ReadRequest) -> Self {
        let mut config = AccountConfig::new(
            req.email,
            req.password,
            req.mfa_type,
            req.mfa_secret,
            req.account_uuid,
            req.meter_number,
        )
        .with_site(req.site)
        .with_headless(req.headless);
        if let Some(account_number) = req.account_number {
            config = config.with_account_number(account_number);
        }
        config
    }
}

/// Result of one meter read request.
#[derive(Debug)]
pub struct ReadResult {
    pub reads: Vec<MeterReading>,
}

/// tower::Service front for the meter scraper.
#[derive(Debug, Clone, Default)]
pub struct MeterReadService {
    // Room for rate limiting etc. later
}

impl MeterReadService {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Service<ReadRequest> for MeterReadService {
    type Response = ReadResult;
    type Error = MeterError;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: ReadRequest) -> Self::Future {
        info!(
            site = req.site.as_str(),
            "meter read request received for {}", req.email
        );

        Box::pin(async move {
            let config: AccountConfig = req.into();
            let meter = Meter::new(config)?;
            let reads = meter.all_reads().await?;

            info!("meter read completed: {} reads", reads.len());
            Ok(ReadResult { reads })
        })
    }
}
