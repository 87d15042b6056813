// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Out-of-band packet tags.
//!
//! Tags travel as side-channel metadata attached to packet objects; the wire
//! forms below (network byte order) exist so a port that must serialise them
//! next to the packet has a defined layout.

use crate::ids::{TenantId, TraceId};
use s2n_codec::{decoder_value, Encoder, EncoderValue};

/// Identifies the tenant a packet belongs to (u32)
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TenantIdTag(pub TenantId);

impl EncoderValue for TenantIdTag {
    #[inline]
    fn encode<E: Encoder>(&self, encoder: &mut E) {
        encoder.encode(&self.0 .0);
    }
}

decoder_value!(
    impl<'a> TenantIdTag {
        fn decode(buffer: Buffer) -> Result<Self> {
            let (id, buffer) = buffer.decode::<u32>()?;
            Ok((Self(TenantId(id)), buffer))
        }
    }
);

/// Identifies the flow a packet belongs to for telemetry and CAWC (u32)
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FlowIdTag(pub TraceId);

impl EncoderValue for FlowIdTag {
    #[inline]
    fn encode<E: Encoder>(&self, encoder: &mut E) {
        encoder.encode(&self.0 .0);
    }
}

decoder_value!(
    impl<'a> FlowIdTag {
        fn decode(buffer: Buffer) -> Result<Self> {
            let (id, buffer) = buffer.decode::<u32>()?;
            Ok((Self(TraceId(id)), buffer))
        }
    }
);

/// Per-packet scheduling weight override for the WFQ discipline (f64)
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FlowWeightTag(pub f64);

impl EncoderValue for FlowWeightTag {
    #[inline]
    fn encode<E: Encoder>(&self, encoder: &mut E) {
        encoder.encode(&self.0);
    }
}

decoder_value!(
    impl<'a> FlowWeightTag {
        fn decode(buffer: Buffer) -> Result<Self> {
            let (weight, buffer) = buffer.decode::<f64>()?;
            Ok((Self(weight), buffer))
        }
    }
);

/// The set of tags attached to one packet
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct TagSet {
    pub tenant_id: Option<TenantIdTag>,
    pub flow_id: Option<FlowIdTag>,
    pub flow_weight: Option<FlowWeightTag>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use s2n_codec::{DecoderBuffer, EncoderBuffer};

    #[test]
    fn wire_round_trip() {
        let mut storage = [0u8; 16];

        let tag = TenantIdTag(TenantId(0xdead_beef));
        let mut encoder = EncoderBuffer::new(&mut storage);
        encoder.encode(&tag);
        let (decoded, _) = DecoderBuffer::new(&storage)
            .decode::<TenantIdTag>()
            .unwrap();
        assert_eq!(decoded, tag);

        let tag = FlowIdTag(TraceId(42));
        let mut encoder = EncoderBuffer::new(&mut storage);
        encoder.encode(&tag);
        let (decoded, _) = DecoderBuffer::new(&storage).decode::<FlowIdTag>().unwrap();
        assert_eq!(decoded, tag);

        let tag = FlowWeightTag(2.5);
        let mut encoder = EncoderBuffer::new(&mut storage);
        encoder.encode(&tag);
        let (decoded, _) = DecoderBuffer::new(&storage)
            .decode::<FlowWeightTag>()
            .unwrap();
        assert_eq!(decoded, tag);
    }
}
