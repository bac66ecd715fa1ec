// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Criterion benchmarks for command encoding, decoding, and payload hashing
// in the sirius-protocol crate.

use criterion::{Criterion, black_box, criterion_group, criterion_main};
use sha2::{Digest, Sha256};

use sirius_core::types::{PixelBuffer, PrintId};
use sirius_protocol::{Message, MessageEncoder, Personality, decode_command};

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

fn bitmap(height: u32) -> PixelBuffer {
    PixelBuffer::from_fn(385, height, |x, y| (x ^ y) % 3 == 0)
}

fn personality_with_message() -> Message {
    Message::SetPersonalityWithMessage {
        personality: Personality {
            face_pixels: bitmap(120),
            nothing_to_print_pixels: bitmap(200),
            cannot_see_bridge_pixels: bitmap(200),
            cannot_see_internet_pixels: bitmap(200),
        },
        message_pixels: bitmap(800),
    }
}

// ---------------------------------------------------------------------------
// Benchmarks
// ---------------------------------------------------------------------------

fn bench_encode(c: &mut Criterion) {
    let encoder = MessageEncoder::default();
    let message = personality_with_message();

    c.bench_function("encode SetPersonalityWithMessage", |b| {
        b.iter(|| {
            let encoded = encoder.encode(black_box(&message)).expect("encode");
            black_box(encoded.command_frame(PrintId(1)).to_bytes());
        });
    });
}

fn bench_decode(c: &mut Criterion) {
    let frame = MessageEncoder::default()
        .encode(&personality_with_message())
        .expect("encode")
        .command_frame(PrintId(1));

    c.bench_function("decode SetPersonalityWithMessage", |b| {
        b.iter(|| black_box(decode_command(black_box(&frame.body)).expect("decode")));
    });
}

/// SHA-256 of a long delivery payload, as computed for every job record.
fn bench_payload_digest(c: &mut Criterion) {
    let encoded = MessageEncoder::default()
        .encode(&Message::SetDelivery {
            pixels: bitmap(2000),
        })
        .expect("encode");

    c.bench_function("sha256 payload (385x2000)", |b| {
        b.iter(|| {
            let digest = Sha256::digest(black_box(encoded.payload()));
            black_box(hex::encode(digest));
        });
    });
}

criterion_group!(benches, bench_encode, bench_decode, bench_payload_digest);
criterion_main!(benches);
