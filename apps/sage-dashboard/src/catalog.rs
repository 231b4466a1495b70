//! What each dashboard page offers: parameters, units, labels, cameras, nodes and the
//! default time window the page opens with.

use chrono::{NaiveDate, NaiveTime};

pub const NODES: &[&str] = &["W083", "W024"];

/// Sensor the environmental metrics come from unless a caller picks another one.
pub const DEFAULT_ENV_SENSOR: &str = "bme680";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnvironmentParameter {
    pub key: &'static str,
    pub unit: &'static str,
}

pub const ENVIRONMENT_PARAMETERS: &[EnvironmentParameter] = &[
    EnvironmentParameter {
        key: "temperature",
        unit: "°C",
    },
    EnvironmentParameter {
        key: "relative_humidity",
        unit: "%",
    },
    EnvironmentParameter {
        key: "pressure",
        unit: "Pa",
    },
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RainParameter {
    pub key: &'static str,
    pub label: &'static str,
    pub unit: &'static str,
}

pub const RAIN_PARAMETERS: &[RainParameter] = &[
    RainParameter {
        key: "rint",
        label: "Rain intensity",
        unit: "mm/h",
    },
    RainParameter {
        key: "total_acc",
        label: "Total accumulation",
        unit: "mm",
    },
    RainParameter {
        key: "event_acc",
        label: "Accumulated per event",
        unit: "mm",
    },
];

impl RainParameter {
    /// Rain intensity is the one rain metric whose meaningful aggregate is a sum.
    pub fn is_intensity(&self) -> bool {
        self.label.to_lowercase().contains("rain intensity")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Camera {
    pub key: &'static str,
    pub label: &'static str,
}

pub const CAMERAS: &[Camera] = &[
    Camera {
        key: "bottom",
        label: "Bottom camera",
    },
    Camera {
        key: "top",
        label: "Top camera",
    },
    Camera {
        key: "left",
        label: "Left camera",
    },
];

pub fn environment_parameter(key: &str) -> Option<&'static EnvironmentParameter> {
    ENVIRONMENT_PARAMETERS.iter().find(|p| p.key == key)
}

pub fn rain_parameter(key: &str) -> Option<&'static RainParameter> {
    RAIN_PARAMETERS.iter().find(|p| p.key == key)
}

pub fn camera(key: &str) -> Option<&'static Camera> {
    CAMERAS.iter().find(|c| c.key == key)
}

pub fn is_known_node(node_id: &str) -> bool {
    NODES.contains(&node_id)
}

/// `relative_humidity` -> `Relative Humidity`.
pub fn display_name(parameter: &str) -> String {
    parameter
        .split(|c: char| c == '_' || c.is_whitespace())
        .filter(|word| !word.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first
                    .to_uppercase()
                    .chain(chars.flat_map(char::to_lowercase))
                    .collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Axis title for a parameter, e.g. `Relative Humidity [%]`.
pub fn axis_label(parameter: &str, unit: &str) -> String {
    format!("{} [{}]", display_name(parameter), unit)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Page {
    Environment,
    Rain,
    Images,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DefaultWindow {
    pub start_date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_date: NaiveDate,
    pub end_time: NaiveTime,
}

impl Page {
    pub fn default_window(self) -> DefaultWindow {
        let (start, end, start_hour, end_hour) = match self {
            Page::Environment => ((2023, 2, 20), (2023, 3, 1), 0, 0),
            Page::Rain => ((2023, 2, 26), (2023, 3, 1), 0, 0),
            Page::Images => ((2023, 3, 1), (2023, 3, 1), 4, 9),
        };
        DefaultWindow {
            start_date: ymd(start),
            start_time: NaiveTime::from_hms_opt(start_hour, 0, 0).unwrap_or_default(),
            end_date: ymd(end),
            end_time: NaiveTime::from_hms_opt(end_hour, 0, 0).unwrap_or_default(),
        }
    }
}

fn ymd((y, m, d): (i32, u32, u32)) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap_or_default()
}
