//! Context-state images.
//!
//! Layout: `MAGIC`, `VERSION_CURRENT` (u32 LE), then chunks of
//! `tag [u8; 4] | len u32 | uncompressed_len u32 | lz4 block`.
//!
//! - `HEAD`: function name (length-prefixed string) and instance seed (u64)
//! - `CTX0`: one context slot as JSON (state, generator, executions and any
//!   per-context parameter values)
//!
//! Unknown chunks are skipped. Images carry execution history only; the
//! instance configuration comes from the function the image is loaded into.

use std::collections::BTreeMap;
use std::io::{self, Read, Write};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::context::ContextId;
use crate::error::{IntegratorError, Result};
use crate::integrator::{check_state_shape, ContextSlot, Integrator, IntegratorFunction};
use crate::param::{resolve_spec, ParamValue};
use crate::prng::Prng;

pub const MAGIC: &[u8; 8] = b"INTEGR01";
pub const VERSION_V1: u32 = 1;
pub const VERSION_CURRENT: u32 = VERSION_V1;

const TAG_HEAD: [u8; 4] = *b"HEAD";
const TAG_CONTEXT: [u8; 4] = *b"CTX0";

pub fn compress_lz4(input: &[u8]) -> Vec<u8> {
    lz4_flex::compress(input)
}

pub fn decompress_lz4(input: &[u8], expected_size: usize) -> io::Result<Vec<u8>> {
    // Raw LZ4 block with external expected size.
    lz4_flex::decompress(input, expected_size)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "lz4 decompression failed"))
}

pub fn write_u32_le<W: Write>(w: &mut W, v: u32) -> io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

pub fn write_u64_le<W: Write>(w: &mut W, v: u64) -> io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

pub fn write_bytes<W: Write>(w: &mut W, bytes: &[u8]) -> io::Result<()> {
    let len = u32::try_from(bytes.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "field too large"))?;
    write_u32_le(w, len)?;
    w.write_all(bytes)
}

pub fn write_string<W: Write>(w: &mut W, s: &str) -> io::Result<()> {
    write_bytes(w, s.as_bytes())
}

pub fn read_exact<const N: usize, R: Read>(r: &mut R) -> io::Result<[u8; N]> {
    let mut buf = [0u8; N];
    r.read_exact(&mut buf)?;
    Ok(buf)
}

pub fn read_u32_le<R: Read>(r: &mut R) -> io::Result<u32> {
    Ok(u32::from_le_bytes(read_exact::<4, _>(r)?))
}

pub fn read_u64_le<R: Read>(r: &mut R) -> io::Result<u64> {
    Ok(u64::from_le_bytes(read_exact::<8, _>(r)?))
}

pub fn read_bytes<R: Read>(r: &mut R) -> io::Result<Vec<u8>> {
    let n = read_u32_le(r)? as usize;
    let mut buf = vec![0u8; n];
    r.read_exact(&mut buf)?;
    Ok(buf)
}

pub fn read_string<R: Read>(r: &mut R) -> io::Result<String> {
    let bytes = read_bytes(r)?;
    String::from_utf8(bytes).map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "invalid utf-8 string"))
}

/// Writes an LZ4 chunk: the payload is preceded by its uncompressed length.
///
/// Layout:
/// - tag: [u8;4]
/// - len: u32 (bytes following, including the 4-byte uncompressed length)
/// - uncompressed_len: u32
/// - compressed payload bytes
pub fn write_chunk_lz4<W: Write>(w: &mut W, tag: [u8; 4], payload: &[u8]) -> io::Result<()> {
    let compressed = compress_lz4(payload);
    let uncompressed_len = u32::try_from(payload.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "chunk too large"))?;
    let total_len = 4u32.saturating_add(
        u32::try_from(compressed.len())
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "chunk too large"))?,
    );

    w.write_all(&tag)?;
    write_u32_le(w, total_len)?;
    write_u32_le(w, uncompressed_len)?;
    w.write_all(&compressed)
}

pub fn read_chunk_header<R: Read>(r: &mut R) -> io::Result<([u8; 4], u32)> {
    let tag = read_exact::<4, _>(r)?;
    let len = read_u32_le(r)?;
    Ok((tag, len))
}

/// Reads and decompresses the body of a chunk whose header was just read.
pub fn read_chunk_payload<R: Read>(r: &mut R, len: u32) -> io::Result<Vec<u8>> {
    let mut take = r.take(len as u64);
    let uncompressed_len = read_u32_le(&mut take)? as usize;
    let mut compressed = Vec::with_capacity((len as usize).saturating_sub(4));
    take.read_to_end(&mut compressed)?;
    if compressed.len() + 4 != len as usize {
        return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "truncated chunk"));
    }
    decompress_lz4(&compressed, uncompressed_len)
}

fn invalid(msg: &'static str) -> IntegratorError {
    IntegratorError::Image(io::Error::new(io::ErrorKind::InvalidData, msg))
}

/// One serialized context slot.
#[derive(Debug, Serialize, Deserialize)]
struct ContextRecord<S> {
    context: ContextId,
    rng: u64,
    executions: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    params: Option<BTreeMap<String, ParamValue>>,
    state: Option<S>,
}

impl<K: Integrator> IntegratorFunction<K> {
    /// Writes every context slot of this function.
    pub fn save_image_to<W: Write>(&self, w: &mut W) -> Result<()> {
        self.write_header(w)?;
        for (id, slot) in self.contexts.iter() {
            write_context_chunk(w, id, slot)?;
        }
        debug!(function = K::NAME, contexts = self.contexts.len(), "state image written");
        Ok(())
    }

    /// Replaces every context slot (and the instance seed) with those in the
    /// image. Returns the number of contexts loaded.
    ///
    /// Nothing changes when the image is malformed or was written by a
    /// different integrator kind.
    pub fn load_image_from<R: Read>(&mut self, r: &mut R) -> Result<usize> {
        let (seed, records) = read_image::<K, _>(r)?;
        let mut slots = Vec::with_capacity(records.len());
        for record in records {
            slots.push(self.restore(record)?);
        }
        self.seed = seed;
        self.contexts.clear();
        for (id, slot) in slots {
            self.contexts.insert(id, slot);
        }
        debug!(function = K::NAME, contexts = self.contexts.len(), "state image loaded");
        Ok(self.contexts.len())
    }

    /// Serializes one context so another worker can continue it.
    pub fn export_context(&self, ctx: ContextId) -> Result<Vec<u8>> {
        let slot = self.contexts.get(ctx).ok_or(IntegratorError::UnknownContext {
            function: K::NAME,
            context: ctx,
        })?;
        let mut out = Vec::new();
        self.write_header(&mut out)?;
        write_context_chunk(&mut out, ctx, slot)?;
        Ok(out)
    }

    /// Installs contexts exported by [`IntegratorFunction::export_context`],
    /// replacing any slot with the same id. Returns the imported ids.
    pub fn import_context(&mut self, bytes: &[u8]) -> Result<Vec<ContextId>> {
        let (_, records) = read_image::<K, _>(&mut io::Cursor::new(bytes))?;
        let mut slots = Vec::with_capacity(records.len());
        for record in records {
            slots.push(self.restore(record)?);
        }
        let ids = slots.iter().map(|(id, _)| *id).collect();
        for (id, slot) in slots {
            debug!(function = K::NAME, context = %id, "context imported");
            self.contexts.insert(id, slot);
        }
        Ok(ids)
    }

    fn write_header<W: Write>(&self, w: &mut W) -> Result<()> {
        w.write_all(MAGIC)?;
        write_u32_le(w, VERSION_CURRENT)?;
        let mut head = Vec::new();
        write_string(&mut head, K::NAME)?;
        write_u64_le(&mut head, self.seed)?;
        write_chunk_lz4(w, TAG_HEAD, &head)?;
        Ok(())
    }

    fn restore(&self, record: ContextRecord<K::State>) -> Result<(ContextId, ContextSlot<K>)> {
        let params = match record.params {
            Some(values) => {
                let mut kind = self.defaults.clone();
                for (name, value) in values {
                    let spec = resolve_spec(kind.param_specs(), &name)
                        .ok_or_else(|| invalid("unknown parameter in context record"))?;
                    kind.set_param(spec.name, value)?;
                }
                kind.validate()?;
                Some(kind)
            }
            None => None,
        };
        if let Some(state) = &record.state {
            check_state_shape::<K>(state)?;
        }
        Ok((
            record.context,
            ContextSlot {
                params,
                state: record.state,
                rng: Prng::new(record.rng),
                executions: record.executions,
            },
        ))
    }
}

fn write_context_chunk<K: Integrator, W: Write>(w: &mut W, id: ContextId, slot: &ContextSlot<K>) -> Result<()> {
    let params = slot.params.as_ref().map(|kind| {
        kind.param_specs()
            .iter()
            .filter_map(|spec| kind.param(spec.name).map(|v| (spec.name.to_string(), v)))
            .collect()
    });
    let record = ContextRecord {
        context: id,
        rng: slot.rng.state(),
        executions: slot.executions,
        params,
        state: slot.state.clone(),
    };
    let payload = serde_json::to_vec(&record)?;
    write_chunk_lz4(w, TAG_CONTEXT, &payload)?;
    Ok(())
}

fn read_image<K: Integrator, R: Read>(r: &mut R) -> Result<(u64, Vec<ContextRecord<K::State>>)> {
    let magic = read_exact::<8, _>(r)?;
    if &magic != MAGIC {
        return Err(invalid("bad state image magic"));
    }
    let version = read_u32_le(r)?;
    if version != VERSION_CURRENT {
        return Err(invalid("unsupported state image version"));
    }

    let mut seed: Option<u64> = None;
    let mut records = Vec::new();
    loop {
        let (tag, len) = match read_chunk_header(r) {
            Ok(v) => v,
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e.into()),
        };
        let payload = read_chunk_payload(r, len)?;
        match &tag {
            b"HEAD" => {
                let mut cursor = io::Cursor::new(payload);
                if read_string(&mut cursor)? != K::NAME {
                    return Err(invalid("state image belongs to a different integrator"));
                }
                seed = Some(read_u64_le(&mut cursor)?);
            }
            b"CTX0" => records.push(serde_json::from_slice(&payload)?),
            _ => {
                // Unknown chunk: skipped.
            }
        }
    }

    let seed = seed.ok_or_else(|| invalid("missing HEAD"))?;
    Ok((seed, records))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::integrator::CallOptions;
    use crate::integrators::{
        AdaptiveIntegrator, DualAdaptiveIntegrator, FitzHughNagumoIntegrator, SimpleIntegrator,
    };
    use crate::param::Distribution;

    fn noisy() -> SimpleIntegrator {
        SimpleIntegrator::default().with_noise(Distribution::Normal {
            mean: 0.0,
            standard_deviation: 0.5,
        })
    }

    #[test]
    fn image_restores_history_and_noise_stream() {
        let mut f = IntegratorFunction::new(noisy()).unwrap().with_seed(17);
        let (a, b) = (ContextId(1), ContextId(2));
        f.execute(&[1.0, 2.0], a).unwrap();
        f.execute(&[3.0], b).unwrap();
        f.set_param("rate", 0.5, b).unwrap();

        let mut image = Vec::new();
        f.save_image_to(&mut image).unwrap();

        let mut g = IntegratorFunction::new(noisy()).unwrap();
        assert_eq!(g.load_image_from(&mut io::Cursor::new(&image)).unwrap(), 2);
        assert_eq!(g.seed(), 17);
        assert_eq!(g.executions(a), 1);
        assert_eq!(g.get_param("rate", Some(b)), Some(ParamValue::Scalar(0.5)));

        for ctx in [a, b] {
            let x = if ctx == a { vec![1.0, 1.0] } else { vec![1.0] };
            assert_eq!(f.execute(&x, ctx).unwrap(), g.execute(&x, ctx).unwrap());
        }
    }

    #[test]
    fn export_and_import_move_one_context() {
        let mut source = IntegratorFunction::new(FitzHughNagumoIntegrator::default()).unwrap();
        let ctx = ContextId::named("worker-1");
        for _ in 0..3 {
            source.execute(&[0.5], ctx).unwrap();
        }
        let bytes = source.export_context(ctx).unwrap();

        let mut dest = IntegratorFunction::new(FitzHughNagumoIntegrator::default()).unwrap();
        assert_eq!(dest.import_context(&bytes).unwrap(), vec![ctx]);
        assert_eq!(dest.state(ctx), source.state(ctx));
        assert_eq!(
            dest.execute(&[0.5], ctx).unwrap(),
            source.execute(&[0.5], ctx).unwrap()
        );
    }

    #[test]
    fn image_of_another_kind_is_rejected() {
        let mut f = IntegratorFunction::new(SimpleIntegrator::default()).unwrap();
        f.execute(&[1.0], ContextId(1)).unwrap();
        let mut image = Vec::new();
        f.save_image_to(&mut image).unwrap();

        let mut g = IntegratorFunction::new(AdaptiveIntegrator::default()).unwrap();
        g.execute(&[1.0], ContextId(9)).unwrap();
        let err = g.load_image_from(&mut io::Cursor::new(&image)).unwrap_err();
        assert!(matches!(err, IntegratorError::Image(_)));
        assert!(g.contains(ContextId(9)));
    }

    #[test]
    fn bad_magic_and_unknown_context() {
        let mut f = IntegratorFunction::new(SimpleIntegrator::default()).unwrap();
        assert!(f.load_image_from(&mut io::Cursor::new(b"NOTANIMG\x01\0\0\0")).is_err());
        assert!(matches!(
            f.export_context(ContextId(3)).unwrap_err(),
            IntegratorError::UnknownContext { .. }
        ));
    }

    fn image_with_context_json(function: &str, context: &str) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(MAGIC);
        write_u32_le(&mut out, VERSION_CURRENT).unwrap();
        let mut head = Vec::new();
        write_string(&mut head, function).unwrap();
        write_u64_le(&mut head, 0).unwrap();
        write_chunk_lz4(&mut out, TAG_HEAD, &head).unwrap();
        write_chunk_lz4(&mut out, TAG_CONTEXT, context.as_bytes()).unwrap();
        out
    }

    #[test]
    fn ragged_state_is_rejected_on_import() {
        let bytes = image_with_context_json(
            DualAdaptiveIntegrator::NAME,
            r#"{"context":1,"rng":7,"executions":1,"state":{"previous_short_term_avg":[0.1,0.2],"previous_long_term_avg":[0.1]}}"#,
        );
        let mut f = IntegratorFunction::new(DualAdaptiveIntegrator::default()).unwrap();
        let err = f.import_context(&bytes).unwrap_err();
        assert!(matches!(
            err,
            IntegratorError::LengthMismatch { param: "previous_long_term_avg", len: 1, expected: 2, .. }
        ));
        assert!(!f.contains(ContextId(1)));
        assert!(f.load_image_from(&mut io::Cursor::new(&bytes)).is_err());
        assert_eq!(f.execute(&[1.0, 1.0], ContextId(1)).unwrap().value.len(), 2);
    }

    #[test]
    fn ragged_oscillator_state_is_rejected() {
        let bytes = image_with_context_json(
            FitzHughNagumoIntegrator::NAME,
            r#"{"context":2,"rng":7,"executions":3,"state":{"previous_v":[0.1,0.2],"previous_w":[0.0],"previous_time":0.15}}"#,
        );
        let mut f = IntegratorFunction::new(FitzHughNagumoIntegrator::default()).unwrap();
        assert!(matches!(
            f.import_context(&bytes).unwrap_err(),
            IntegratorError::LengthMismatch { param: "previous_w", .. }
        ));
    }

    #[test]
    fn sticky_parameters_survive_the_round_trip() {
        let mut f = IntegratorFunction::new(AdaptiveIntegrator::default()).unwrap();
        let ctx = ContextId(4);
        let opts = CallOptions::executing().with_override("rate", 0.25).sticky();
        f.execute_with(&[4.0], ctx, &opts).unwrap();
        let bytes = f.export_context(ctx).unwrap();

        let mut g = IntegratorFunction::new(AdaptiveIntegrator::default()).unwrap();
        g.import_context(&bytes).unwrap();
        assert_eq!(g.get_param("rate", Some(ctx)), Some(ParamValue::Scalar(0.25)));
        assert_eq!(g.execute(&[4.0], ctx).unwrap().value, vec![1.75]);
    }
}
