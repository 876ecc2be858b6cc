use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::boundary::{ParameterError, ParameterProvider};
use crate::experiment::Settings;
use crate::potentiostat::{CvParameters, EisParameters};

use super::error::FeedbackError;

/// Settings of one current-controlled approach.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApproachParameters {
    /// Current threshold (pA)
    pub cutoff_pa: f64,
    /// Compare against a baseline taken before moving instead of zero
    pub relative: bool,
    /// Z step per approach iteration (µm)
    pub step_size: f64,
    /// Height to start from (µm); the current height when `None`
    pub height: Option<f64>,
    /// XY to start from (µm); the current XY when `None`
    pub start: Option<(f64, f64)>,
}

impl Default for ApproachParameters {
    fn default() -> Self {
        Self {
            cutoff_pa: 5.0,
            relative: true,
            step_size: 0.01,
            height: None,
            start: None,
        }
    }
}

impl ApproachParameters {
    /// Check the approach can be run.
    pub fn validate(&self) -> Result<(), FeedbackError> {
        if !(self.cutoff_pa > 0.0) || !self.cutoff_pa.is_finite() {
            return Err(FeedbackError::InvalidParameters(format!(
                "cutoff current must be positive, got {} pA",
                self.cutoff_pa
            )));
        }
        if !(self.step_size > 0.0) || !self.step_size.is_finite() {
            return Err(FeedbackError::InvalidParameters(format!(
                "approach step must be positive, got {} µm",
                self.step_size
            )));
        }
        Ok(())
    }
}

/// Electrochemistry run at every pixel of a hopping scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ExperimentKind {
    /// One CV
    Cv,
    /// One EIS
    Eis,
    /// CV, then EIS biased at the estimated formal potential
    CvThenEis,
    /// CV, then one EIS per amplitude of [`super::EIS_AMPLITUDES_MV`]
    CvThenEisAmplitudes,
    /// CV, then several EIS separated by a fixed wait
    CvThenEisWait,
    /// A stored vendor sequence
    Custom {
        /// Sequence name
        sequence: String,
        /// Nominal run time (s)
        duration_s: f64,
    },
}

impl ExperimentKind {
    /// Whether any CV is part of the chain.
    pub fn uses_cv(&self) -> bool {
        matches!(
            self,
            ExperimentKind::Cv
                | ExperimentKind::CvThenEis
                | ExperimentKind::CvThenEisAmplitudes
                | ExperimentKind::CvThenEisWait
        )
    }

    /// Whether any EIS is part of the chain.
    pub fn uses_eis(&self) -> bool {
        matches!(
            self,
            ExperimentKind::Eis
                | ExperimentKind::CvThenEis
                | ExperimentKind::CvThenEisAmplitudes
                | ExperimentKind::CvThenEisWait
        )
    }
}

impl fmt::Display for ExperimentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExperimentKind::Cv => f.write_str("cv"),
            ExperimentKind::Eis => f.write_str("eis"),
            ExperimentKind::CvThenEis => f.write_str("cv+eis"),
            ExperimentKind::CvThenEisAmplitudes => f.write_str("cv+eis-amplitudes"),
            ExperimentKind::CvThenEisWait => f.write_str("cv+eis-wait"),
            ExperimentKind::Custom {
                sequence,
                duration_s,
            } => write!(f, "custom:{}:{}", sequence, duration_s),
        }
    }
}

impl FromStr for ExperimentKind {
    type Err = FeedbackError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let text = s.trim();
        let kind = match text.to_ascii_lowercase().as_str() {
            "cv" => ExperimentKind::Cv,
            "eis" => ExperimentKind::Eis,
            "cv+eis" => ExperimentKind::CvThenEis,
            "cv+eis-amplitudes" => ExperimentKind::CvThenEisAmplitudes,
            "cv+eis-wait" => ExperimentKind::CvThenEisWait,
            _ => {
                let mut parts = text.splitn(3, ':');
                let (Some(tag), Some(sequence), Some(duration)) =
                    (parts.next(), parts.next(), parts.next())
                else {
                    return Err(FeedbackError::InvalidParameters(format!(
                        "unknown experiment type '{}'",
                        text
                    )));
                };
                let duration_s = duration.trim().parse::<f64>().ok().filter(|d| *d > 0.0);
                match (tag.eq_ignore_ascii_case("custom"), duration_s) {
                    (true, Some(duration_s)) if !sequence.trim().is_empty() => ExperimentKind::Custom {
                        sequence: sequence.trim().to_string(),
                        duration_s,
                    },
                    _ => {
                        return Err(FeedbackError::InvalidParameters(format!(
                            "expected custom:<sequence>:<seconds>, got '{}'",
                            text
                        )))
                    }
                }
            }
        };
        Ok(kind)
    }
}

/// Settings of a hopping-mode scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HoppingParameters {
    /// Side of the scanned square (µm)
    pub length: f64,
    /// Height to return to between pixels (µm); a negative value instead
    /// retracts by its magnitude from the surface at every pixel
    pub z_ceiling: f64,
    /// Points per row
    pub n_points: usize,
    /// Chain run at each pixel
    pub kind: ExperimentKind,
    /// Cells to visit, `mask[j][i]`; all cells when `None`
    pub mask: Option<Vec<Vec<bool>>>,
}

impl HoppingParameters {
    /// Check the scan geometry.
    pub fn validate(&self) -> Result<(), FeedbackError> {
        if self.n_points == 0 {
            return Err(FeedbackError::InvalidParameters(
                "a scan needs at least one point per row".to_string(),
            ));
        }
        if !(self.length >= 0.0) || !self.length.is_finite() {
            return Err(FeedbackError::InvalidParameters(format!(
                "scan length must be non-negative, got {}",
                self.length
            )));
        }
        if !self.z_ceiling.is_finite() {
            return Err(FeedbackError::InvalidParameters(format!(
                "z ceiling {} is not finite",
                self.z_ceiling
            )));
        }
        Ok(())
    }
}

/// Everything a hopping scan needs, gathered before it starts.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanRequest {
    /// Grid and chain
    pub hopping: HoppingParameters,
    /// Approach run at every pixel
    pub approach: ApproachParameters,
    /// CV settings, required when the chain has a CV
    pub cv: Option<CvParameters>,
    /// EIS settings, required when the chain has an EIS
    pub eis: Option<EisParameters>,
    /// Parameter snapshot stored with the experiment
    pub settings: Settings,
}

impl ScanRequest {
    /// Read a request from the boundary; CV and EIS settings are only
    /// required when the chain uses them.
    pub fn from_parameters<P: ParameterProvider + ?Sized>(params: &P) -> Result<Self, ParameterError> {
        let hopping = params.hopping()?;
        let cv = if hopping.kind.uses_cv() { Some(params.cv()?) } else { None };
        let eis = if hopping.kind.uses_eis() { Some(params.eis()?) } else { None };
        Ok(Self {
            approach: params.approach()?,
            cv,
            eis,
            settings: params.snapshot(),
            hopping,
        })
    }

    /// Check geometry and that the chain has the settings it needs.
    pub fn validate(&self) -> Result<(), FeedbackError> {
        self.hopping.validate()?;
        self.approach.validate()?;
        if self.hopping.kind.uses_cv() && self.cv.is_none() {
            return Err(FeedbackError::InvalidParameters(format!(
                "'{}' needs CV parameters",
                self.hopping.kind
            )));
        }
        if self.hopping.kind.uses_eis() && self.eis.is_none() {
            return Err(FeedbackError::InvalidParameters(format!(
                "'{}' needs EIS parameters",
                self.hopping.kind
            )));
        }
        Ok(())
    }
}
