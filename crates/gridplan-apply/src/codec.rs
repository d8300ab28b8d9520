//! Wire encoding for committed plan batches.
//!
//! One log entry is a length-prefixed, versioned frame:
//!
//! ```text
//! length: u32 BE | version: u8 | body: MessagePack(PlanBatch)
//! ```
//!
//! The length covers version byte and body. The body is self-describing
//! MessagePack with name-tagged fields (`rmp_serde::to_vec_named`), so a
//! reader can skip fields it does not know; empty maps serialize as
//! zero-length maps. Version `0x01` is the encoding defined here.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use gridplan_state::PlanBatch;

use crate::error::CodecError;

/// Current batch entry version.
pub const BATCH_VERSION: u8 = 0x01;

const LEN_PREFIX: usize = 4;

/// Encode one plan batch into a framed log entry.
pub fn encode_batch(batch: &PlanBatch) -> Result<Bytes, CodecError> {
    let body = rmp_serde::to_vec_named(batch).map_err(|e| CodecError::Encode(e.to_string()))?;
    let payload_len = body.len() + 1;

    let mut buf = BytesMut::with_capacity(LEN_PREFIX + payload_len);
    buf.put_u32(payload_len as u32);
    buf.put_u8(BATCH_VERSION);
    buf.extend_from_slice(&body);
    Ok(buf.freeze())
}

/// Decode one framed log entry back into a plan batch.
pub fn decode_batch(entry: &[u8]) -> Result<PlanBatch, CodecError> {
    if entry.len() < LEN_PREFIX + 1 {
        return Err(CodecError::Truncated);
    }

    let mut buf = entry;
    let payload_len = buf.get_u32() as usize;
    if buf.remaining() != payload_len {
        return Err(CodecError::Truncated);
    }

    let version = buf.get_u8();
    if version != BATCH_VERSION {
        return Err(CodecError::UnsupportedVersion(version));
    }

    rmp_serde::from_slice(buf).map_err(|e| CodecError::Decode(e.to_string()))
}

/// Size of a batch once framed for the log.
pub fn encoded_len(batch: &PlanBatch) -> Result<usize, CodecError> {
    encode_batch(batch).map(|entry| entry.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use gridplan_state::{
        Allocation, ClientStatus, DesiredStatus, Job, JobRef, ResourceVector,
    };
    use std::collections::HashMap;
    use uuid::Uuid;

    fn test_batch() -> PlanBatch {
        let node_id = Uuid::new_v4();
        let job = Job {
            id: "web".to_string(),
            name: "web".to_string(),
            priority: 50,
            modify_index: 0,
        };
        let alloc = Allocation {
            id: Uuid::new_v4(),
            job_id: job.id.clone(),
            node_id,
            resources: ResourceVector {
                cpu_mhz: 500,
                memory_mb: 256,
                ..ResourceVector::default()
            },
            desired_status: DesiredStatus::Run,
            desired_description: String::new(),
            client_status: ClientStatus::Pending,
            job: JobRef::ByRef,
            preempted_by: None,
            create_index: 0,
            modify_index: 0,
        };
        PlanBatch {
            plan_index: 7,
            job: Some(job),
            deployment: None,
            node_allocation: HashMap::from([(node_id, vec![alloc])]),
            ..PlanBatch::default()
        }
    }

    #[test]
    fn roundtrip() {
        let batch = test_batch();
        let entry = encode_batch(&batch).unwrap();
        let decoded = decode_batch(&entry).unwrap();
        assert_eq!(decoded, batch);
    }

    #[test]
    fn frame_layout() {
        let entry = encode_batch(&test_batch()).unwrap();
        let payload_len = u32::from_be_bytes(entry[..4].try_into().unwrap()) as usize;
        assert_eq!(payload_len, entry.len() - 4);
        assert_eq!(entry[4], BATCH_VERSION);
    }

    #[test]
    fn empty_batch_roundtrips() {
        let batch = PlanBatch::default();
        let decoded = decode_batch(&encode_batch(&batch).unwrap()).unwrap();
        assert_eq!(decoded, batch);
    }

    #[test]
    fn unknown_version_rejected() {
        let mut entry = encode_batch(&test_batch()).unwrap().to_vec();
        entry[4] = 0x02;
        assert_eq!(
            decode_batch(&entry).unwrap_err(),
            CodecError::UnsupportedVersion(0x02)
        );
    }

    #[test]
    fn truncated_entry_rejected() {
        let entry = encode_batch(&test_batch()).unwrap();
        assert_eq!(
            decode_batch(&entry[..entry.len() - 3]).unwrap_err(),
            CodecError::Truncated
        );
        assert_eq!(decode_batch(&entry[..3]).unwrap_err(), CodecError::Truncated);
        assert_eq!(decode_batch(&[]).unwrap_err(), CodecError::Truncated);
    }

    #[test]
    fn garbage_body_is_a_decode_error() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&5u32.to_be_bytes());
        buf.push(BATCH_VERSION);
        buf.extend_from_slice(&[0xc1, 0xc1, 0xc1, 0xc1]);
        assert!(matches!(
            decode_batch(&buf).unwrap_err(),
            CodecError::Decode(_)
        ));
    }
}
