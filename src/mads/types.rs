use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Domain of one input variable.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum InputType {
    /// Real-valued variable (granularity 0).
    Continuous,
    /// Integer variable (granularity 1).
    Integer,
    /// Integer-coded category. Never moved by poll or search.
    Categorical,
    /// Variable restricted to multiples of the given positive granularity.
    Granular(f64),
}

impl InputType {
    /// Granularity g_i: 0 for continuous, 1 for integer and categorical.
    pub fn granularity(&self) -> f64 {
        match self {
            InputType::Continuous => 0.0,
            InputType::Integer | InputType::Categorical => 1.0,
            InputType::Granular(g) => *g,
        }
    }

    pub fn is_granular(&self) -> bool {
        self.granularity() > 0.0
    }

    pub fn is_categorical(&self) -> bool {
        matches!(self, InputType::Categorical)
    }

    /// Rounds `value` to the closest admissible value of this domain.
    pub fn round(&self, value: f64) -> f64 {
        let g = self.granularity();
        if g > 0.0 {
            (value / g).round() * g
        } else {
            value
        }
    }

    /// Whether `value` respects the granularity. The tolerance is `epsilon`,
    /// floored at 1e-9, relative to the number of granules.
    pub fn admits(&self, value: f64, epsilon: f64) -> bool {
        let g = self.granularity();
        if g <= 0.0 {
            return value.is_finite();
        }
        let ratio = value / g;
        (ratio - ratio.round()).abs() <= epsilon.max(1e-9) * ratio.abs().max(1.0)
    }
}

impl FromStr for InputType {
    type Err = Error;

    /// Accepts `R`, `I`, `B` (binary, an integer in [0, 1] by bounds), `C`,
    /// and `G(<granularity>)`.
    fn from_str(s: &str) -> Result<Self> {
        let token = s.trim();
        match token.to_ascii_uppercase().as_str() {
            "R" => return Ok(InputType::Continuous),
            "I" | "B" => return Ok(InputType::Integer),
            "C" => return Ok(InputType::Categorical),
            _ => {}
        }
        let inner = token
            .strip_prefix('G')
            .or_else(|| token.strip_prefix('g'))
            .and_then(|rest| rest.strip_prefix('('))
            .and_then(|rest| rest.strip_suffix(')'))
            .ok_or_else(|| Error::ParameterInvalid(format!("unknown input type '{token}'")))?;
        let g: f64 = inner
            .trim()
            .parse()
            .map_err(|_| Error::ParameterInvalid(format!("invalid granularity '{inner}'")))?;
        if !(g.is_finite() && g > 0.0) {
            return Err(Error::ParameterInvalid(format!(
                "granularity must be positive, got {g}"
            )));
        }
        Ok(InputType::Granular(g))
    }
}

/// Role of one blackbox output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BbOutputType {
    /// The objective to minimize.
    #[serde(rename = "OBJ")]
    Obj,
    /// Progressive-barrier constraint `c(x) <= 0`.
    #[serde(rename = "PB")]
    Pb,
    /// Extreme-barrier constraint `c(x) <= 0`.
    #[serde(rename = "EB")]
    Eb,
    /// Informational output.
    #[serde(rename = "STAT")]
    Stat,
}

impl BbOutputType {
    pub fn is_constraint(&self) -> bool {
        matches!(self, BbOutputType::Pb | BbOutputType::Eb)
    }
}

impl FromStr for BbOutputType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "OBJ" => Ok(BbOutputType::Obj),
            "PB" => Ok(BbOutputType::Pb),
            "EB" => Ok(BbOutputType::Eb),
            "STAT" | "NOTHING" | "-" => Ok(BbOutputType::Stat),
            other => Err(Error::ParameterInvalid(format!(
                "unknown output type '{other}'"
            ))),
        }
    }
}

impl fmt::Display for BbOutputType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BbOutputType::Obj => "OBJ",
            BbOutputType::Pb => "PB",
            BbOutputType::Eb => "EB",
            BbOutputType::Stat => "STAT",
        };
        f.write_str(name)
    }
}

/// Parses a whitespace separated list such as `"OBJ PB PB EB"`.
pub fn parse_output_types(s: &str) -> Result<Vec<BbOutputType>> {
    s.split_whitespace().map(BbOutputType::from_str).collect()
}

/// Parses a whitespace separated list such as `"R I G(0.5)"`.
pub fn parse_input_types(s: &str) -> Result<Vec<InputType>> {
    s.split_whitespace().map(InputType::from_str).collect()
}

/// Poll direction family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DirectionType {
    /// OrthoMADS basis, n directions plus their negative sum.
    #[default]
    OrthoNPlus1,
    /// OrthoMADS basis and its negative, 2n directions.
    Ortho2N,
    /// LT-MADS random lower triangular basis plus the negative sum.
    LtNPlus1,
    /// LT-MADS random lower triangular basis and its negative.
    Lt2N,
    /// Plus and minus each coordinate axis.
    Coordinate2N,
}

impl FromStr for DirectionType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.split_whitespace().collect::<Vec<_>>().join(" ");
        match normalized.to_ascii_uppercase().as_str() {
            "ORTHO N+1" | "ORTHO N+1 NEG" | "ORTHO" => Ok(DirectionType::OrthoNPlus1),
            "ORTHO 2N" => Ok(DirectionType::Ortho2N),
            "LT N+1" => Ok(DirectionType::LtNPlus1),
            "LT 2N" | "LT" => Ok(DirectionType::Lt2N),
            "GPS 2N" | "COORDINATE 2N" | "2N" => Ok(DirectionType::Coordinate2N),
            other => Err(Error::ParameterInvalid(format!(
                "unknown direction type '{other}'"
            ))),
        }
    }
}

/// Outcome of one blackbox call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EvalStatus {
    #[serde(rename = "ok")]
    Ok,
    #[serde(rename = "failed")]
    Failed,
}

/// Success class of a point, a phase or an iteration.
///
/// Ordered so that `max` combines search and poll outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum SuccessClass {
    Unsuccessful,
    Improving,
    Dominating,
}

impl fmt::Display for SuccessClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SuccessClass::Unsuccessful => "unsuccessful",
            SuccessClass::Improving => "improving",
            SuccessClass::Dominating => "dominating",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IncumbentKind {
    Feasible,
    Infeasible,
}
