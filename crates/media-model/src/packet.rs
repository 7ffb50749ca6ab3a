//! Encoded output packets.

/// A chunk of encoded, muxed output delivered by an encoder session.
///
/// `seq` increases by one per packet within a session. `pts_ns` is the PTS of
/// the media the packet was produced from (see `golive-encoder` for how muxed
/// transcoder output is tagged).
#[derive(Clone, PartialEq, Eq)]
pub struct EncodedPacket {
    pub seq: u64,
    pub pts_ns: u64,
    pub data: Vec<u8>,
}

impl std::fmt::Debug for EncodedPacket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncodedPacket")
            .field("seq", &self.seq)
            .field("pts_ns", &self.pts_ns)
            .field("bytes", &self.data.len())
            .finish()
    }
}

impl EncodedPacket {
    pub fn new(seq: u64, pts_ns: u64, data: Vec<u8>) -> Self {
        Self { seq, pts_ns, data }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}
