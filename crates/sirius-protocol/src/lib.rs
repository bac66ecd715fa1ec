// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Sirius Protocol — print command encoding, the device wire codec, the
// connection registry, per-device protocol sessions, and the dispatch façade
// every caller goes through.

pub mod codec;
pub mod dispatch;
pub mod messages;
pub mod registry;
pub mod server;
pub mod session;

pub use codec::{DeviceFrame, EncodedMessage, Frame, MessageEncoder, decode_command};
pub use dispatch::{DispatchOutcome, Dispatcher, JobStatus, PrintJob};
pub use messages::{Message, MessageKind, Personality, PersonalityTemplates, PrintAction};
pub use registry::ConnectionRegistry;
pub use server::{DeviceServer, serve_connection};
pub use session::{DeviceSession, OfflineReason, PrintIdAllocator};
