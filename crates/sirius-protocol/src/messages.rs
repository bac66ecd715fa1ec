// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Print commands understood by the devices.
//
// A closed set of variants, each a named-field record of packed bitmaps.
// The encoder matches exhaustively, so a new variant does not compile until
// it has a wire tag and a bitmap order.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sirius_core::error::SiriusError;
use sirius_core::types::PixelBuffer;

/// One print command.  Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Queue for delivery; the device shows its face.
    SetDelivery { pixels: PixelBuffer },
    /// Queue and print immediately; the device shows its face.
    SetDeliveryAndPrint { pixels: PixelBuffer },
    /// Queue for delivery without the face.
    SetDeliveryNoFace { pixels: PixelBuffer },
    /// Queue and print immediately without the face.
    SetDeliveryAndPrintNoFace { pixels: PixelBuffer },
    /// Replace the device's personality bitmaps.
    SetPersonality(Personality),
    /// Replace the personality and print a message with it.
    SetPersonalityWithMessage {
        personality: Personality,
        message_pixels: PixelBuffer,
    },
}

/// The four bitmaps that make up a device personality.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Personality {
    pub face_pixels: PixelBuffer,
    pub nothing_to_print_pixels: PixelBuffer,
    pub cannot_see_bridge_pixels: PixelBuffer,
    pub cannot_see_internet_pixels: PixelBuffer,
}

/// Variant discriminant, used for logs and dispatch records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageKind {
    SetDelivery,
    SetDeliveryAndPrint,
    SetDeliveryNoFace,
    SetDeliveryAndPrintNoFace,
    SetPersonality,
    SetPersonalityWithMessage,
}

impl MessageKind {
    /// Wire tag of this variant.
    pub fn tag(&self) -> u8 {
        match self {
            Self::SetDelivery => 1,
            Self::SetDeliveryAndPrint => 2,
            Self::SetDeliveryNoFace => 3,
            Self::SetDeliveryAndPrintNoFace => 4,
            Self::SetPersonality => 5,
            Self::SetPersonalityWithMessage => 6,
        }
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            1 => Some(Self::SetDelivery),
            2 => Some(Self::SetDeliveryAndPrint),
            3 => Some(Self::SetDeliveryNoFace),
            4 => Some(Self::SetDeliveryAndPrintNoFace),
            5 => Some(Self::SetPersonality),
            6 => Some(Self::SetPersonalityWithMessage),
            _ => None,
        }
    }

    /// Number of bitmaps a frame of this variant carries.
    pub fn bitmap_count(&self) -> usize {
        match self {
            Self::SetDelivery
            | Self::SetDeliveryAndPrint
            | Self::SetDeliveryNoFace
            | Self::SetDeliveryAndPrintNoFace => 1,
            Self::SetPersonality => 4,
            Self::SetPersonalityWithMessage => 5,
        }
    }
}

impl Message {
    pub fn kind(&self) -> MessageKind {
        match self {
            Self::SetDelivery { .. } => MessageKind::SetDelivery,
            Self::SetDeliveryAndPrint { .. } => MessageKind::SetDeliveryAndPrint,
            Self::SetDeliveryNoFace { .. } => MessageKind::SetDeliveryNoFace,
            Self::SetDeliveryAndPrintNoFace { .. } => MessageKind::SetDeliveryAndPrintNoFace,
            Self::SetPersonality(_) => MessageKind::SetPersonality,
            Self::SetPersonalityWithMessage { .. } => MessageKind::SetPersonalityWithMessage,
        }
    }

    /// Bitmaps in wire order.
    pub fn bitmaps(&self) -> Vec<&PixelBuffer> {
        match self {
            Self::SetDelivery { pixels }
            | Self::SetDeliveryAndPrint { pixels }
            | Self::SetDeliveryNoFace { pixels }
            | Self::SetDeliveryAndPrintNoFace { pixels } => vec![pixels],
            Self::SetPersonality(personality) => personality.bitmaps().to_vec(),
            Self::SetPersonalityWithMessage {
                personality,
                message_pixels,
            } => {
                let mut all = personality.bitmaps().to_vec();
                all.push(message_pixels);
                all
            }
        }
    }

    /// Rebuild a message from its kind and bitmaps in wire order.
    ///
    /// Returns `None` when the number of bitmaps does not match the variant.
    pub fn from_parts(kind: MessageKind, bitmaps: Vec<PixelBuffer>) -> Option<Self> {
        if bitmaps.len() != kind.bitmap_count() {
            return None;
        }
        let mut it = bitmaps.into_iter();
        let message = match kind {
            MessageKind::SetDelivery => Self::SetDelivery { pixels: it.next()? },
            MessageKind::SetDeliveryAndPrint => Self::SetDeliveryAndPrint { pixels: it.next()? },
            MessageKind::SetDeliveryNoFace => Self::SetDeliveryNoFace { pixels: it.next()? },
            MessageKind::SetDeliveryAndPrintNoFace => {
                Self::SetDeliveryAndPrintNoFace { pixels: it.next()? }
            }
            MessageKind::SetPersonality => Self::SetPersonality(Personality::take_from(&mut it)?),
            MessageKind::SetPersonalityWithMessage => {
                let personality = Personality::take_from(&mut it)?;
                Self::SetPersonalityWithMessage {
                    personality,
                    message_pixels: it.next()?,
                }
            }
        };
        Some(message)
    }
}

impl Personality {
    /// Bitmaps in wire order.
    pub fn bitmaps(&self) -> [&PixelBuffer; 4] {
        [
            &self.face_pixels,
            &self.nothing_to_print_pixels,
            &self.cannot_see_bridge_pixels,
            &self.cannot_see_internet_pixels,
        ]
    }

    fn take_from(it: &mut impl Iterator<Item = PixelBuffer>) -> Option<Self> {
        Some(Self {
            face_pixels: it.next()?,
            nothing_to_print_pixels: it.next()?,
            cannot_see_bridge_pixels: it.next()?,
            cannot_see_internet_pixels: it.next()?,
        })
    }
}

/// Print actions accepted by the raw-upload route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PrintAction {
    /// `deliveryandface`
    DeliveryAndFace,
    /// `printandface`
    PrintAndFace,
    /// `delivery`
    Delivery,
    /// `print`
    Print,
    /// `personality`
    Personality,
    /// `personalityandmessage`
    PersonalityAndMessage,
}

impl FromStr for PrintAction {
    type Err = SiriusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "deliveryandface" => Ok(Self::DeliveryAndFace),
            "printandface" => Ok(Self::PrintAndFace),
            "delivery" => Ok(Self::Delivery),
            "print" => Ok(Self::Print),
            "personality" => Ok(Self::Personality),
            "personalityandmessage" => Ok(Self::PersonalityAndMessage),
            other => Err(SiriusError::Encoding(format!("unknown print action {other:?}"))),
        }
    }
}

/// Personality bitmaps other than the face, supplied by the caller when an
/// upload becomes a new face.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersonalityTemplates {
    pub nothing_to_print_pixels: PixelBuffer,
    pub cannot_see_bridge_pixels: PixelBuffer,
    pub cannot_see_internet_pixels: PixelBuffer,
    /// Printed alongside a `personalityandmessage` update.
    pub message_pixels: PixelBuffer,
}

impl PersonalityTemplates {
    /// A personality with `face` and these templates.
    pub fn with_face(&self, face: PixelBuffer) -> Personality {
        Personality {
            face_pixels: face,
            nothing_to_print_pixels: self.nothing_to_print_pixels.clone(),
            cannot_see_bridge_pixels: self.cannot_see_bridge_pixels.clone(),
            cannot_see_internet_pixels: self.cannot_see_internet_pixels.clone(),
        }
    }
}

impl PrintAction {
    pub fn kind(&self) -> MessageKind {
        match self {
            Self::DeliveryAndFace => MessageKind::SetDelivery,
            Self::PrintAndFace => MessageKind::SetDeliveryAndPrint,
            Self::Delivery => MessageKind::SetDeliveryNoFace,
            Self::Print => MessageKind::SetDeliveryAndPrintNoFace,
            Self::Personality => MessageKind::SetPersonality,
            Self::PersonalityAndMessage => MessageKind::SetPersonalityWithMessage,
        }
    }

    /// Build the command for an uploaded bitmap.
    ///
    /// Delivery actions print `pixels`; personality actions install it as the
    /// face and take the other bitmaps from `templates`, which they require.
    pub fn build(
        self,
        pixels: PixelBuffer,
        templates: Option<&PersonalityTemplates>,
    ) -> Result<Message, SiriusError> {
        let missing = || SiriusError::Encoding(format!("{self:?} needs personality templates"));

        let message = match self {
            Self::DeliveryAndFace => Message::SetDelivery { pixels },
            Self::PrintAndFace => Message::SetDeliveryAndPrint { pixels },
            Self::Delivery => Message::SetDeliveryNoFace { pixels },
            Self::Print => Message::SetDeliveryAndPrintNoFace { pixels },
            Self::Personality => {
                let t = templates.ok_or_else(missing)?;
                Message::SetPersonality(t.with_face(pixels))
            }
            Self::PersonalityAndMessage => {
                let t = templates.ok_or_else(missing)?;
                Message::SetPersonalityWithMessage {
                    personality: t.with_face(pixels),
                    message_pixels: t.message_pixels.clone(),
                }
            }
        };
        Ok(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strip(height: u32) -> PixelBuffer {
        PixelBuffer::filled(385, height, false)
    }

    fn templates() -> PersonalityTemplates {
        PersonalityTemplates {
            nothing_to_print_pixels: strip(2),
            cannot_see_bridge_pixels: strip(3),
            cannot_see_internet_pixels: strip(4),
            message_pixels: strip(5),
        }
    }

    #[test]
    fn tags_round_trip() {
        for tag in 1..=6 {
            let kind = MessageKind::from_tag(tag).expect("known tag");
            assert_eq!(kind.tag(), tag);
        }
        assert!(MessageKind::from_tag(0).is_none());
        assert!(MessageKind::from_tag(7).is_none());
    }

    #[test]
    fn personality_bitmaps_follow_field_order() {
        let message = PrintAction::PersonalityAndMessage
            .build(strip(1), Some(&templates()))
            .unwrap();
        let heights: Vec<u32> = message.bitmaps().iter().map(|b| b.height()).collect();
        assert_eq!(heights, vec![1, 2, 3, 4, 5]);
        assert_eq!(message.kind(), MessageKind::SetPersonalityWithMessage);
    }

    #[test]
    fn from_parts_rejects_wrong_bitmap_count() {
        assert!(Message::from_parts(MessageKind::SetPersonality, vec![strip(1)]).is_none());
        assert!(Message::from_parts(MessageKind::SetDelivery, vec![strip(1), strip(1)]).is_none());
    }

    #[test]
    fn actions_map_to_variants() {
        let cases = [
            ("deliveryandface", MessageKind::SetDelivery),
            ("printandface", MessageKind::SetDeliveryAndPrint),
            ("delivery", MessageKind::SetDeliveryNoFace),
            ("print", MessageKind::SetDeliveryAndPrintNoFace),
            ("personality", MessageKind::SetPersonality),
            ("personalityandmessage", MessageKind::SetPersonalityWithMessage),
        ];
        for (keyword, kind) in cases {
            let action: PrintAction = keyword.parse().unwrap();
            assert_eq!(action.kind(), kind);
            let message = action.build(strip(1), Some(&templates())).unwrap();
            assert_eq!(message.kind(), kind);
        }
    }

    #[test]
    fn unknown_action_is_rejected() {
        assert!("wtf".parse::<PrintAction>().is_err());
    }

    #[test]
    fn personality_action_needs_templates() {
        assert!(PrintAction::Personality.build(strip(1), None).is_err());
        assert!(PrintAction::Print.build(strip(1), None).is_ok());
    }
}
