//! Effect capability table
//!
//! The fixed mapping between the effect names a host can select and the
//! one-byte code the controller expects. Code `0x0b` is not used by the
//! firmware and has no entry.

use std::fmt;
use std::str::FromStr;

/// Animated effects supported by the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Effect {
    ColorLoop,
    RedFade,
    GreenFade,
    BlueFade,
    YellowFade,
    CyanFade,
    PurpleFade,
    WhiteFade,
    RgCrossFade,
    RbCrossFade,
    GbCrossFade,
    ColorStrobe,
    RedStrobe,
    GreenStrobe,
    BlueStrobe,
    YellowStrobe,
    CyanStrobe,
    PurpleStrobe,
    WhiteStrobe,
    ColorJump,
}

/// Every effect, in wire-code order.
pub const EFFECTS: [Effect; 20] = [
    Effect::ColorLoop,
    Effect::RedFade,
    Effect::GreenFade,
    Effect::BlueFade,
    Effect::YellowFade,
    Effect::CyanFade,
    Effect::PurpleFade,
    Effect::WhiteFade,
    Effect::RgCrossFade,
    Effect::RbCrossFade,
    Effect::GbCrossFade,
    Effect::ColorStrobe,
    Effect::RedStrobe,
    Effect::GreenStrobe,
    Effect::BlueStrobe,
    Effect::YellowStrobe,
    Effect::CyanStrobe,
    Effect::PurpleStrobe,
    Effect::WhiteStrobe,
    Effect::ColorJump,
];

impl Effect {
    /// Wire code sent in the effect packet
    pub fn code(self) -> u8 {
        match self {
            Self::ColorLoop => 0x00,
            Self::RedFade => 0x01,
            Self::GreenFade => 0x02,
            Self::BlueFade => 0x03,
            Self::YellowFade => 0x04,
            Self::CyanFade => 0x05,
            Self::PurpleFade => 0x06,
            Self::WhiteFade => 0x07,
            Self::RgCrossFade => 0x08,
            Self::RbCrossFade => 0x09,
            Self::GbCrossFade => 0x0a,
            Self::ColorStrobe => 0x0c,
            Self::RedStrobe => 0x0d,
            Self::GreenStrobe => 0x0e,
            Self::BlueStrobe => 0x0f,
            Self::YellowStrobe => 0x10,
            Self::CyanStrobe => 0x11,
            Self::PurpleStrobe => 0x12,
            Self::WhiteStrobe => 0x13,
            Self::ColorJump => 0x14,
        }
    }

    /// Externally visible effect name
    pub fn name(self) -> &'static str {
        match self {
            Self::ColorLoop => "colorloop",
            Self::RedFade => "red_fade",
            Self::GreenFade => "green_fade",
            Self::BlueFade => "blue_fade",
            Self::YellowFade => "yellow_fade",
            Self::CyanFade => "cyan_fade",
            Self::PurpleFade => "purple_fade",
            Self::WhiteFade => "white_fade",
            Self::RgCrossFade => "rg_cross_fade",
            Self::RbCrossFade => "rb_cross_fade",
            Self::GbCrossFade => "gb_cross_fade",
            Self::ColorStrobe => "colorstrobe",
            Self::RedStrobe => "red_strobe",
            Self::GreenStrobe => "green_strobe",
            Self::BlueStrobe => "blue_strobe",
            Self::YellowStrobe => "yellow_strobe",
            Self::CyanStrobe => "cyan_strobe",
            Self::PurpleStrobe => "purple_strobe",
            Self::WhiteStrobe => "white_strobe",
            Self::ColorJump => "colorjump",
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        EFFECTS.iter().copied().find(|effect| effect.code() == code)
    }
}

impl fmt::Display for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Effect {0} not supported")]
pub struct UnknownEffect(pub String);

impl FromStr for Effect {
    type Err = UnknownEffect;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EFFECTS
            .iter()
            .copied()
            .find(|effect| effect.name() == s)
            .ok_or_else(|| UnknownEffect(s.to_string()))
    }
}

/// Selectable effect names, sorted alphabetically
pub fn effect_list() -> Vec<&'static str> {
    let mut names: Vec<&'static str> = EFFECTS.iter().map(|effect| effect.name()).collect();
    names.sort_unstable();
    names
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_names_and_codes_are_a_bijection() {
        let names: HashSet<_> = EFFECTS.iter().map(|e| e.name()).collect();
        let codes: HashSet<_> = EFFECTS.iter().map(|e| e.code()).collect();
        assert_eq!(names.len(), EFFECTS.len());
        assert_eq!(codes.len(), EFFECTS.len());

        for effect in EFFECTS {
            assert_eq!(effect.name().parse::<Effect>(), Ok(effect));
            assert_eq!(Effect::from_code(effect.code()), Some(effect));
        }
    }

    #[test]
    fn test_code_0x0b_is_not_assigned() {
        assert_eq!(Effect::from_code(0x0b), None);
        assert_eq!(Effect::GbCrossFade.code(), 0x0a);
        assert_eq!(Effect::ColorStrobe.code(), 0x0c);
        assert_eq!(Effect::ColorJump.code(), 0x14);
    }

    #[test]
    fn test_unknown_names_are_rejected() {
        assert!("rgb_cross_fade".parse::<Effect>().is_err());
        assert!("ColorLoop".parse::<Effect>().is_err());
        assert!("".parse::<Effect>().is_err());
    }

    #[test]
    fn test_effect_list_is_sorted() {
        let list = effect_list();
        assert_eq!(list.len(), 20);
        assert_eq!(list.first(), Some(&"blue_fade"));
        assert_eq!(list.last(), Some(&"yellow_strobe"));
        assert!(list.windows(2).all(|pair| pair[0] < pair[1]));
    }
}
