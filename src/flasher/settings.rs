use std::str::FromStr;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, IntoEnumIterator, VariantNames};

use crate::Error;

/// Supported flash frequencies
#[derive(
    Debug, Default, Clone, Copy, Hash, PartialEq, Eq, Display, VariantNames, Serialize, Deserialize,
)]
#[non_exhaustive]
pub enum FlashFrequency {
    /// 20 MHz
    #[serde(rename = "20MHz")]
    #[strum(serialize = "20MHz")]
    _20Mhz,
    /// 26 MHz
    #[serde(rename = "26MHz")]
    #[strum(serialize = "26MHz")]
    _26Mhz,
    /// 40 MHz
    #[default]
    #[serde(rename = "40MHz")]
    #[strum(serialize = "40MHz")]
    _40Mhz,
    /// 80 MHz
    #[serde(rename = "80MHz")]
    #[strum(serialize = "80MHz")]
    _80Mhz,
}

impl FlashFrequency {
    /// Encodes flash frequency into the low nibble of the image header's
    /// flash config byte.
    pub const fn encode_flash_frequency(self) -> u8 {
        match self {
            FlashFrequency::_40Mhz => 0x0,
            FlashFrequency::_26Mhz => 0x1,
            FlashFrequency::_20Mhz => 0x2,
            FlashFrequency::_80Mhz => 0xf,
        }
    }
}

/// Supported flash modes
#[derive(
    Copy, Clone, Debug, Default, Hash, PartialEq, Eq, Display, VariantNames, Serialize, Deserialize,
)]
#[non_exhaustive]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum FlashMode {
    /// Quad I/O (4 pins used for address & data)
    Qio,
    /// Quad Output (4 pins used for data)
    Qout,
    /// Dual I/O (2 pins used for address & data)
    #[default]
    Dio,
    /// Dual Output (2 pins used for data)
    Dout,
}

/// Supported flash sizes
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    Hash,
    Eq,
    PartialEq,
    Display,
    VariantNames,
    EnumIter,
    Serialize,
    Deserialize,
)]
#[non_exhaustive]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum FlashSize {
    /// 256 KB
    #[serde(rename = "256KB")]
    #[strum(serialize = "256KB")]
    _256Kb,
    /// 512 KB
    #[serde(rename = "512KB")]
    #[strum(serialize = "512KB")]
    _512Kb,
    /// 1 MB
    #[serde(rename = "1MB")]
    #[strum(serialize = "1MB")]
    _1Mb,
    /// 2 MB
    #[serde(rename = "2MB")]
    #[strum(serialize = "2MB")]
    _2Mb,
    /// 4 MB
    #[default]
    #[serde(rename = "4MB")]
    #[strum(serialize = "4MB")]
    _4Mb,
    /// 8 MB
    #[serde(rename = "8MB")]
    #[strum(serialize = "8MB")]
    _8Mb,
    /// 16 MB
    #[serde(rename = "16MB")]
    #[strum(serialize = "16MB")]
    _16Mb,
}

impl FlashSize {
    /// Encodes flash size into the high nibble of the image header's flash
    /// config byte.
    pub const fn encode_flash_size(self) -> u8 {
        match self {
            FlashSize::_512Kb => 0x00,
            FlashSize::_256Kb => 0x10,
            FlashSize::_1Mb => 0x20,
            FlashSize::_2Mb => 0x30,
            FlashSize::_4Mb => 0x40,
            FlashSize::_8Mb => 0x80,
            FlashSize::_16Mb => 0x90,
        }
    }

    /// Returns the flash size in bytes
    pub const fn size(self) -> u32 {
        match self {
            FlashSize::_256Kb => 0x0040000,
            FlashSize::_512Kb => 0x0080000,
            FlashSize::_1Mb => 0x0100000,
            FlashSize::_2Mb => 0x0200000,
            FlashSize::_4Mb => 0x0400000,
            FlashSize::_8Mb => 0x0800000,
            FlashSize::_16Mb => 0x1000000,
        }
    }
}

impl FromStr for FlashSize {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        FlashSize::VARIANTS
            .iter()
            .copied()
            .zip(FlashSize::iter())
            .find(|(name, _)| *name == s.to_uppercase())
            .map(|(_, variant)| variant)
            .ok_or_else(|| Error::InvalidFlashSize(s.to_string()))
    }
}

/// Flash settings baked into the image header when flashing
///
/// Fields left as `None` keep whatever the image header already contains.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub struct FlashSettings {
    pub mode: Option<FlashMode>,
    pub size: Option<FlashSize>,
    #[serde(rename = "frequency")]
    pub freq: Option<FlashFrequency>,
}

impl FlashSettings {
    pub fn new(
        mode: Option<FlashMode>,
        size: Option<FlashSize>,
        freq: Option<FlashFrequency>,
    ) -> Self {
        FlashSettings { mode, size, freq }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flash_size_from_str() {
        assert_eq!("1MB".parse::<FlashSize>().unwrap(), FlashSize::_1Mb);
        assert_eq!("16mb".parse::<FlashSize>().unwrap(), FlashSize::_16Mb);
        assert!(matches!(
            "3MB".parse::<FlashSize>(),
            Err(Error::InvalidFlashSize(s)) if s == "3MB"
        ));
    }

    #[test]
    fn flash_size_bytes() {
        assert_eq!(FlashSize::_1Mb.size(), 1024 * 1024);
        assert_eq!(FlashSize::_4Mb.size(), 4 * 1024 * 1024);
    }

    #[test]
    fn settings_deserialize_with_renames() {
        let settings: FlashSettings =
            toml::from_str("mode = \"qio\"\nsize = \"2MB\"\nfrequency = \"80MHz\"").unwrap();

        assert_eq!(
            settings,
            FlashSettings::new(
                Some(FlashMode::Qio),
                Some(FlashSize::_2Mb),
                Some(FlashFrequency::_80Mhz)
            )
        );
    }
}
