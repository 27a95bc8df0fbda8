/*
* Kexprobe, a post-quantum key exchange probe for TLS and QUIC endpoints.
* Copyright (C) 2024 Kaede Akino
*
* This program is free software: you can redistribute it and/or modify
* it under the terms of the GNU General Public License as published by
* the Free Software Foundation, either version 3 of the License, or
* (at your option) any later version.
*
* This program is distributed in the hope that it will be useful,
* but WITHOUT ANY WARRANTY; without even the implied warranty of
* MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
* GNU General Public License for more details.
*
* You should have received a copy of the GNU General Public License
* along with this program. If not, see <http://www.gnu.org/licenses/>.
*/

//! Post-quantum key exchange probing for TLS and QUIC endpoints.
//!
//! The crate drives single handshakes against remote endpoints and reports
//! which key exchange group was negotiated, whether the server asked for a
//! different key share, and whether it takes part in trust anchor
//! negotiation or serves Merkle Tree Certificates. The same handshake
//! observation machinery is used on the serving side to describe what a
//! visiting client offered.

pub use self::{
    error::Error,
    group::{classify, KeyExchangeGroup},
    landmark::{HttpLandmarkSource, LandmarkSource, Landmarks},
    observer::{HandshakeEvent, HandshakeObserver, HandshakeRecorder, HandshakeReport, HandshakeTable},
    probe::{probe, GroupPreference, ProbeOptions, ProbeOutcome, ProbeRequest, ProbeResult, Transport},
    sniff::RecordSniffer,
    tai::TrustAnchorId,
};

mod error;

pub mod group;
pub mod inspect;
pub mod landmark;
pub mod observer;
pub mod probe;
pub mod sniff;
pub mod tai;
