// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::path::PathBuf;
use std::sync::Arc;

use serde::Deserialize;
use utoipa::ToSchema;

use crate::flows::beneficiary::BeneficiaryFlow;
use crate::flows::{FlowHandler, FlowPrivateKey};

/// Which Flow endpoint a request arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum FlowKind {
    Onramp,
    Offramp,
    Transfer,
    Beneficiary,
}

#[derive(Clone)]
pub struct AppState {
    pub flow_key: Arc<FlowPrivateKey>,
    /// Enables `X-Hub-Signature-256` checks when set.
    pub app_secret: Option<Arc<str>>,
    pub onramp: Arc<dyn FlowHandler>,
    pub offramp: Arc<dyn FlowHandler>,
    pub transfer: Arc<dyn FlowHandler>,
    pub beneficiary: Arc<BeneficiaryFlow>,
    pub data_dir: Option<PathBuf>,
}

impl AppState {
    pub fn handler(&self, kind: FlowKind) -> Arc<dyn FlowHandler> {
        match kind {
            FlowKind::Onramp => self.onramp.clone(),
            FlowKind::Offramp => self.offramp.clone(),
            FlowKind::Transfer => self.transfer.clone(),
            FlowKind::Beneficiary => self.beneficiary.clone() as Arc<dyn FlowHandler>,
        }
    }
}
