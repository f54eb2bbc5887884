// Copyright 2025 Devicelink (https://github.com/devicelink)
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Topic pattern matching
//!
//! A small segment matcher for MQTT-style topic filters. Only the `+`
//! single-segment wildcard is supported; segment counts must match exactly,
//! so a topic with extra trailing segments never matches.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
enum Segment {
    Literal(String),
    Any,
}

/// A parsed topic filter such as `devices/+/sensors/+/data`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicFilter {
    segments: Vec<Segment>,
}

/// A successful match: the topic's segments captured at each `+` position,
/// in filter order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicMatch {
    pub wildcards: Vec<String>,
}

impl TopicFilter {
    /// Parse a filter string. Empty filters and empty segments are invalid.
    pub fn parse(filter: &str) -> Option<Self> {
        if filter.is_empty() {
            return None;
        }
        let mut segments = Vec::new();
        for part in filter.split('/') {
            match part {
                "" => return None,
                "+" => segments.push(Segment::Any),
                literal => segments.push(Segment::Literal(literal.to_string())),
            }
        }
        Some(Self { segments })
    }

    /// Match a concrete topic, returning captured wildcard segments.
    pub fn matches(&self, topic: &str) -> Option<TopicMatch> {
        let parts: Vec<&str> = topic.split('/').collect();
        if parts.len() != self.segments.len() {
            return None;
        }
        let mut wildcards = Vec::new();
        for (segment, part) in self.segments.iter().zip(&parts) {
            match segment {
                Segment::Any => wildcards.push((*part).to_string()),
                Segment::Literal(literal) if literal == part => {}
                Segment::Literal(_) => return None,
            }
        }
        Some(TopicMatch { wildcards })
    }

    /// The filter in its string form, for subscriptions and logging.
    pub fn as_pattern(&self) -> String {
        self.segments
            .iter()
            .map(|s| match s {
                Segment::Literal(l) => l.as_str(),
                Segment::Any => "+",
            })
            .collect::<Vec<_>>()
            .join("/")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_match() {
        let filter = TopicFilter::parse("devices/esp32_aa11bb/status").unwrap();
        let m = filter.matches("devices/esp32_aa11bb/status").unwrap();
        assert!(m.wildcards.is_empty());
        assert!(filter.matches("devices/other/status").is_none());
    }

    #[test]
    fn test_wildcard_capture() {
        let filter = TopicFilter::parse("devices/+/sensors/+/data").unwrap();
        let m = filter.matches("devices/esp32_aa11bb/sensors/temperature/data").unwrap();
        assert_eq!(m.wildcards, vec!["esp32_aa11bb", "temperature"]);
    }

    #[test]
    fn test_extra_trailing_segments_do_not_match() {
        let filter = TopicFilter::parse("devices/+/status").unwrap();
        assert!(filter.matches("devices/d1/status/extra").is_none());
        assert!(filter.matches("devices/d1").is_none());
    }

    #[test]
    fn test_invalid_filters() {
        assert!(TopicFilter::parse("").is_none());
        assert!(TopicFilter::parse("devices//status").is_none());
    }

    #[test]
    fn test_pattern_roundtrip() {
        let pattern = "devices/+/actuators/+/status";
        let filter = TopicFilter::parse(pattern).unwrap();
        assert_eq!(filter.as_pattern(), pattern);
    }
}
