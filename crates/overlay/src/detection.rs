//! Detection model and display categories

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::geometry::PercentBox;
use crate::OverlayError;

/// Display category used for color coding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisplayCategory {
    Vehicle,
    Pedestrian,
    Sign,
    Other,
}

impl DisplayCategory {
    /// Case-insensitive label classification
    pub fn from_label(label: &str) -> Self {
        let label = label.trim().to_ascii_lowercase();
        if label.contains("sign") || label.contains("light") {
            return DisplayCategory::Sign;
        }
        match label.as_str() {
            "car" | "truck" | "bus" | "van" | "motorcycle" | "motorbike" | "bicycle" | "vehicle" => {
                DisplayCategory::Vehicle
            }
            "person" | "pedestrian" | "rider" => DisplayCategory::Pedestrian,
            _ => DisplayCategory::Other,
        }
    }

    pub fn color(&self) -> Color {
        match self {
            DisplayCategory::Vehicle => Color::VEHICLE,
            DisplayCategory::Pedestrian => Color::PEDESTRIAN,
            DisplayCategory::Sign => Color::SIGN,
            DisplayCategory::Other => Color::LANE,
        }
    }
}

/// Opaque RGBA display color, serialized as `#rrggbb`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct Color(pub [u8; 4]);

impl Color {
    pub const VEHICLE: Color = Color([0x3b, 0x82, 0xf6, 0xff]);
    pub const PEDESTRIAN: Color = Color([0xef, 0x44, 0x44, 0xff]);
    pub const SIGN: Color = Color([0xf5, 0x9e, 0x0b, 0xff]);
    pub const LANE: Color = Color([0x10, 0xb9, 0x81, 0xff]);
    pub const WHITE: Color = Color([0xff, 0xff, 0xff, 0xff]);

    pub fn rgb(r: u8, g: u8, b: u8) -> Self {
        Color([r, g, b, 0xff])
    }

    /// Parse `#rrggbb` or `rrggbb`
    pub fn from_hex(hex: &str) -> Result<Self, OverlayError> {
        let digits = hex.trim().trim_start_matches('#');
        if digits.len() != 6 || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(OverlayError::InvalidColor(hex.to_string()));
        }
        let channel = |i: usize| u8::from_str_radix(&digits[i..i + 2], 16);
        match (channel(0), channel(2), channel(4)) {
            (Ok(r), Ok(g), Ok(b)) => Ok(Color::rgb(r, g, b)),
            _ => Err(OverlayError::InvalidColor(hex.to_string())),
        }
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:02x}{:02x}{:02x}", self.0[0], self.0[1], self.0[2])
    }
}

impl From<Color> for String {
    fn from(c: Color) -> Self {
        c.to_string()
    }
}

impl TryFrom<String> for Color {
    type Error = OverlayError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Color::from_hex(&s)
    }
}

/// One recognized object in a frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    /// Unique within one frame's detection set only
    pub id: String,
    pub label: String,
    /// 0.0 to 1.0
    pub confidence: f64,
    pub bbox: PercentBox,
    pub color: Color,
}

impl Detection {
    /// Create a detection, deriving its color from the label
    pub fn new(id: impl Into<String>, label: impl Into<String>, confidence: f64, bbox: PercentBox) -> Self {
        let label = label.into();
        let color = DisplayCategory::from_label(&label).color();
        Self {
            id: id.into(),
            label,
            confidence,
            bbox,
            color,
        }
    }

    pub fn category(&self) -> DisplayCategory {
        DisplayCategory::from_label(&self.label)
    }

    /// Chip text, e.g. `"Car 88%"`
    pub fn label_text(&self) -> String {
        format_label(&self.label, self.confidence)
    }
}

/// Format `"{Label} {percent}%"` with the percentage rounded to an integer
pub fn format_label(label: &str, confidence: f64) -> String {
    let mut chars = label.trim().chars();
    let label = match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
        None => String::new(),
    };
    format!("{} {:.0}%", label, (confidence * 100.0).round())
}

/// Static demo scenario, reused verbatim whenever live mode is off
pub fn demo_detections() -> Vec<Detection> {
    vec![
        Detection::new("1", "Car", 0.98, PercentBox::new(15.0, 60.0, 20.0, 15.0)),
        Detection::new("2", "Truck", 0.95, PercentBox::new(45.0, 58.0, 12.0, 10.0)),
        Detection::new("3", "Pedestrian", 0.88, PercentBox::new(75.0, 55.0, 5.0, 12.0)),
        Detection::new("4", "Traffic Sign", 0.92, PercentBox::new(85.0, 20.0, 6.0, 8.0)),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_formatting() {
        assert_eq!(format_label("car", 0.876), "Car 88%");
        assert_eq!(format_label("Traffic Sign", 0.92), "Traffic Sign 92%");
        assert_eq!(format_label("truck", 1.0), "Truck 100%");
        assert_eq!(format_label("", 0.5), " 50%");
    }

    #[test]
    fn test_category_mapping() {
        assert_eq!(DisplayCategory::from_label("CAR"), DisplayCategory::Vehicle);
        assert_eq!(DisplayCategory::from_label("person"), DisplayCategory::Pedestrian);
        assert_eq!(DisplayCategory::from_label("stop sign"), DisplayCategory::Sign);
        assert_eq!(DisplayCategory::from_label("traffic light"), DisplayCategory::Sign);
        assert_eq!(DisplayCategory::from_label("dog"), DisplayCategory::Other);
    }

    #[test]
    fn test_color_derived_from_label() {
        let det = Detection::new("7", "Pedestrian", 0.5, PercentBox::new(0.0, 0.0, 1.0, 1.0));
        assert_eq!(det.color, Color::PEDESTRIAN);
        assert_eq!(det.color.to_string(), "#ef4444");
    }

    #[test]
    fn test_color_serde() {
        let json = serde_json::to_string(&Color::VEHICLE).unwrap();
        assert_eq!(json, "\"#3b82f6\"");
        let back: Color = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Color::VEHICLE);
        assert!(serde_json::from_str::<Color>("\"#zzz\"").is_err());
    }

    #[test]
    fn test_demo_scene_is_stable() {
        let a = demo_detections();
        assert_eq!(a, demo_detections());
        assert_eq!(a.len(), 4);
        assert_eq!(a[3].category(), DisplayCategory::Sign);
    }
}
