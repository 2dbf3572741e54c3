//! Host capability report.

use crate::separation::SeparationMethod;
use serde::Serialize;
use std::path::PathBuf;
use stemmix_core::{HostProfile, OptimizationLevel, ResourceSnapshot, Tool};

/// Availability of one external tool.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolStatus {
    pub name: String,
    pub available: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub problem: Option<String>,
}

/// What this host can do, and how well.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CapabilityReport {
    pub optimization_level: OptimizationLevel,
    pub resources: ResourceSnapshot,
    pub tools: Vec<ToolStatus>,
    /// Separation tiers that can currently run, best first.
    pub separation_tiers: Vec<SeparationMethod>,
}

impl CapabilityReport {
    pub fn detect(host: &HostProfile) -> Self {
        let tools: Vec<ToolStatus> = Tool::ALL
            .iter()
            .map(|&tool| match host.tools.resolve(tool) {
                Ok(launch) => ToolStatus {
                    name: tool.name().into(),
                    available: true,
                    path: Some(launch.program),
                    problem: None,
                },
                Err(e) => ToolStatus {
                    name: tool.name().into(),
                    available: false,
                    path: None,
                    problem: Some(e.to_string()),
                },
            })
            .chain(std::iter::once(ToolStatus {
                name: "python".into(),
                available: host.tools.python.as_deref().is_some_and(|p| p.exists()),
                path: host.tools.python.clone(),
                problem: None,
            }))
            .collect();

        let mut separation_tiers = Vec::new();
        if host.tools.is_available(Tool::Separator) {
            separation_tiers.push(SeparationMethod::Ml);
        }
        if host.tools.is_available(Tool::Ffmpeg) {
            separation_tiers.push(SeparationMethod::Filter);
        }
        separation_tiers.push(SeparationMethod::Identity);

        Self {
            optimization_level: host.level(),
            resources: host.resources,
            tools,
            separation_tiers,
        }
    }

    /// Best separation tier available.
    pub fn best_separation(&self) -> SeparationMethod {
        self.separation_tiers
            .first()
            .copied()
            .unwrap_or(SeparationMethod::Identity)
    }

    /// Whether mixing can produce anything better than a copy.
    pub fn can_mix(&self) -> bool {
        self.tools
            .iter()
            .any(|t| t.name == Tool::Ffmpeg.name() && t.available)
    }
}
