use serde::{Deserialize, Serialize};

/// Job priority tiers. Lower numeric value = higher priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobPriority {
    Critical = 1,
    High = 2,
    Normal = 3,
    Low = 4,
    Background = 5,
}

// Broker ordering: jobs.sort_by_key(|j| (j.priority.rank(), sequence))
// - Critical first, Background last
// - FIFO within the same tier

impl Default for JobPriority {
    fn default() -> Self {
        Self::Normal
    }
}

impl JobPriority {
    /// All tiers, highest priority first
    pub fn all() -> &'static [JobPriority] {
        &[
            Self::Critical,
            Self::High,
            Self::Normal,
            Self::Low,
            Self::Background,
        ]
    }

    /// Numeric rank as understood by the broker
    pub fn rank(self) -> u8 {
        self as u8
    }

    pub fn from_rank(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::Critical),
            2 => Some(Self::High),
            3 => Some(Self::Normal),
            4 => Some(Self::Low),
            5 => Some(Self::Background),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::High => "high",
            Self::Normal => "normal",
            Self::Low => "low",
            Self::Background => "background",
        }
    }
}

impl std::fmt::Display for JobPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for JobPriority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Ok(rank) = s.parse::<u8>() {
            return Self::from_rank(rank).ok_or_else(|| format!("Invalid priority rank: {}", s));
        }
        match s.to_lowercase().as_str() {
            "critical" => Ok(Self::Critical),
            "high" => Ok(Self::High),
            "normal" => Ok(Self::Normal),
            "low" => Ok(Self::Low),
            "background" => Ok(Self::Background),
            _ => Err(format!("Invalid priority: {}", s)),
        }
    }
}
