// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! The vocabulary used to describe a port to the SDE.

use std::fmt;
use std::str::FromStr;

use serde::de;
use serde::Deserialize;
use serde::Deserializer;
use serde::Serialize;
use serde::Serializer;
use thiserror::Error;

/// The SDE's device identifier.  A system with a single Tofino only has
/// device 0.
pub type DeviceId = i32;

/// The SDE's device port number.  This is a 9-bit addressing scheme, where
/// the lower 7 bits represent a port on the ASIC and the upper 2 bits
/// represent the pipeline that processes the data to/from that port.
pub type DevPort = u16;

/// One past the largest valid `DevPort`.
pub const DEV_PORT_LIMIT: DevPort = 1 << 9;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PortParseError {
    #[error("invalid port speed: {0}")]
    Speed(String),
    #[error("invalid FEC mode: {0}")]
    Fec(String),
}

/// Speeds with which a port may be configured.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum PortSpeed {
    Speed1G,
    Speed10G,
    Speed25G,
    Speed40G,
    Speed50G,
    Speed100G,
    Speed200G,
    Speed400G,
}

impl PortSpeed {
    pub const ALL: [PortSpeed; 8] = [
        PortSpeed::Speed1G,
        PortSpeed::Speed10G,
        PortSpeed::Speed25G,
        PortSpeed::Speed40G,
        PortSpeed::Speed50G,
        PortSpeed::Speed100G,
        PortSpeed::Speed200G,
        PortSpeed::Speed400G,
    ];

    /// Link rate in gigabits per second.
    pub fn gbps(&self) -> u32 {
        match self {
            PortSpeed::Speed1G => 1,
            PortSpeed::Speed10G => 10,
            PortSpeed::Speed25G => 25,
            PortSpeed::Speed40G => 40,
            PortSpeed::Speed50G => 50,
            PortSpeed::Speed100G => 100,
            PortSpeed::Speed200G => 200,
            PortSpeed::Speed400G => 400,
        }
    }
}

impl fmt::Display for PortSpeed {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}G", self.gbps())
    }
}

impl FromStr for PortSpeed {
    type Err = PortParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_lowercase();
        let digits = lower.strip_suffix('g').unwrap_or(&lower);
        let gbps = digits
            .parse::<u32>()
            .map_err(|_| PortParseError::Speed(s.to_string()))?;
        PortSpeed::ALL
            .iter()
            .find(|speed| speed.gbps() == gbps)
            .copied()
            .ok_or_else(|| PortParseError::Speed(s.to_string()))
    }
}

/// Error-correction schemes which may be applied to a link.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum PortFec {
    None,
    Firecode,
    RS,
}

impl PortFec {
    /// Returns true if the SDE will accept this FEC mode on a port running at
    /// `speed`.
    ///
    /// Firecode (clause 74) is only defined for the 10G-per-lane family of
    /// speeds and 25G/50G, while Reed-Solomon (clause 91) needs at least 25G
    /// per lane.
    pub fn valid_for(&self, speed: PortSpeed) -> bool {
        match self {
            PortFec::None => true,
            PortFec::Firecode => matches!(
                speed,
                PortSpeed::Speed10G
                    | PortSpeed::Speed25G
                    | PortSpeed::Speed40G
                    | PortSpeed::Speed50G
            ),
            PortFec::RS => matches!(
                speed,
                PortSpeed::Speed25G
                    | PortSpeed::Speed50G
                    | PortSpeed::Speed100G
                    | PortSpeed::Speed200G
                    | PortSpeed::Speed400G
            ),
        }
    }
}

impl fmt::Display for PortFec {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            PortFec::None => write!(f, "none"),
            PortFec::Firecode => write!(f, "firecode"),
            PortFec::RS => write!(f, "rs"),
        }
    }
}

impl FromStr for PortFec {
    type Err = PortParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "none" => Ok(PortFec::None),
            "firecode" | "fc" => Ok(PortFec::Firecode),
            "rs" => Ok(PortFec::RS),
            _ => Err(PortParseError::Fec(s.to_string())),
        }
    }
}

// Both enums travel through config files in their textual form.
macro_rules! serde_via_str {
    ($t:ty) => {
        impl Serialize for $t {
            fn serialize<S: Serializer>(
                &self,
                serializer: S,
            ) -> Result<S::Ok, S::Error> {
                serializer.collect_str(self)
            }
        }

        impl<'de> Deserialize<'de> for $t {
            fn deserialize<D: Deserializer<'de>>(
                deserializer: D,
            ) -> Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                s.parse().map_err(de::Error::custom)
            }
        }
    };
}

serde_via_str!(PortSpeed);
serde_via_str!(PortFec);

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Deserialize, Serialize, PartialEq)]
    struct Link {
        speed: PortSpeed,
        fec: PortFec,
    }

    #[test]
    fn test_parse_speed() {
        assert_eq!("10G".parse::<PortSpeed>(), Ok(PortSpeed::Speed10G));
        assert_eq!("25g".parse::<PortSpeed>(), Ok(PortSpeed::Speed25G));
        assert_eq!("100".parse::<PortSpeed>(), Ok(PortSpeed::Speed100G));
        assert!("0G".parse::<PortSpeed>().is_err());
        assert!("30G".parse::<PortSpeed>().is_err());
        assert!("fast".parse::<PortSpeed>().is_err());
    }

    #[test]
    fn test_speed_display_parses_back() {
        for speed in PortSpeed::ALL {
            assert_eq!(speed.to_string().parse::<PortSpeed>(), Ok(speed));
        }
    }

    #[test]
    fn test_parse_fec() {
        assert_eq!("none".parse::<PortFec>(), Ok(PortFec::None));
        assert_eq!("FC".parse::<PortFec>(), Ok(PortFec::Firecode));
        assert_eq!("RS".parse::<PortFec>(), Ok(PortFec::RS));
        assert_eq!(
            "reed-solomon".parse::<PortFec>(),
            Err(PortParseError::Fec("reed-solomon".to_string()))
        );
    }

    #[test]
    fn test_fec_speed_compatibility() {
        assert!(PortFec::None.valid_for(PortSpeed::Speed1G));
        assert!(PortFec::Firecode.valid_for(PortSpeed::Speed10G));
        assert!(!PortFec::Firecode.valid_for(PortSpeed::Speed100G));
        assert!(PortFec::RS.valid_for(PortSpeed::Speed100G));
        assert!(!PortFec::RS.valid_for(PortSpeed::Speed10G));
        assert!(PortFec::RS.valid_for(PortSpeed::Speed25G));
    }

    #[test]
    fn test_toml() {
        let link: Link = toml::from_str("speed = \"25G\"\nfec = \"rs\"\n")
            .unwrap();
        assert_eq!(
            link,
            Link {
                speed: PortSpeed::Speed25G,
                fec: PortFec::RS
            }
        );
        assert!(toml::from_str::<Link>("speed = \"7G\"\nfec = \"rs\"\n")
            .is_err());
    }
}
