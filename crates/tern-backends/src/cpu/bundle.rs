// Bundle — Ahead-of-time export of a CPU plan
//
// A bundle for network `net` is three files in the output directory:
//
//   net.h        C header declaring the entry point and region sizes:
//                  int net(uint8_t *constantWeight, uint8_t *mutableWeight,
//                          uint8_t *activations);
//   net.weights  constant region image:
//                  ┌──────────────┬──────────────────────┬──────────────────┐
//                  │ header size  │ JSON header (UTF-8)  │ constant region  │
//                  │ (8 bytes LE) │                      │ (aligned, LE)    │
//                  └──────────────┴──────────────────────┴──────────────────┘
//   net.plan     the instruction tape with resolved region offsets; the
//                first line names the entry symbol
//
// Every buffer starts at a multiple of the configured alignment inside its
// region: constants in constantWeight, placeholders in mutableWeight and
// tape slots in activations.

use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use tern_core::{Error, Result, TensorType};
use tern_graph::Placeholder;

use super::plan::{Instruction, Plan};

/// Where a bundle was written and how large its regions are.
#[derive(Debug, Clone)]
pub struct BundleInfo {
    pub header_path: PathBuf,
    pub weights_path: PathBuf,
    pub plan_path: PathBuf,
    pub constant_mem_size: usize,
    pub mutable_mem_size: usize,
    pub activations_mem_size: usize,
}

/// JSON header of a `.weights` file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightsHeader {
    pub network: String,
    pub alignment: usize,
    pub constant_mem_size: usize,
    pub constants: Vec<WeightEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightEntry {
    pub name: String,
    pub elem_kind: String,
    pub dims: Vec<usize>,
    pub offset: usize,
    pub size: usize,
}

/// Network names become C symbols and file name prefixes.
pub fn validate_network_name(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    };
    if valid {
        Ok(())
    } else {
        Err(Error::Bundle {
            network: name.to_string(),
            reason: "network name must be a C identifier".to_string(),
        })
    }
}

fn align_up(offset: usize, alignment: usize) -> usize {
    offset.div_ceil(alignment) * alignment
}

/// Assign aligned offsets to consecutive buffers. Returns the offsets and
/// the total region size.
fn layout<'a>(
    types: impl IntoIterator<Item = &'a TensorType>,
    alignment: usize,
) -> (Vec<usize>, usize) {
    let mut offsets = Vec::new();
    let mut end = 0;
    for ty in types {
        let at = align_up(end, alignment);
        offsets.push(at);
        end = at + ty.size_in_bytes();
    }
    (offsets, align_up(end, alignment))
}

/// Placeholders touched by the plan, in first-use order.
fn placeholders(plan: &Plan) -> Vec<&Placeholder> {
    let mut out: Vec<&Placeholder> = Vec::new();
    for instr in &plan.instructions {
        let ph = match instr {
            Instruction::LoadInput { placeholder, .. }
            | Instruction::Store { placeholder, .. } => placeholder,
            _ => continue,
        };
        if !out.iter().any(|p| p.id() == ph.id()) {
            out.push(ph);
        }
    }
    out
}

fn c_ident(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

pub(crate) fn write_bundle(
    plan: &Plan,
    dir: &Path,
    network: &str,
    alignment: usize,
) -> Result<BundleInfo> {
    validate_network_name(network)?;
    let bundle_err = |reason: String| Error::Bundle {
        network: network.to_string(),
        reason,
    };

    let phs = placeholders(plan);
    let (const_offsets, constant_mem_size) =
        layout(plan.constants.iter().map(|(_, t)| t.ty()), alignment);
    let (ph_offsets, mutable_mem_size) = layout(phs.iter().map(|p| p.ty()), alignment);
    let (slot_offsets, activations_mem_size) = layout(plan.slot_types.iter(), alignment);

    fs::create_dir_all(dir)
        .map_err(|e| bundle_err(format!("cannot create {}: {e}", dir.display())))?;

    // Header
    let prefix = network.to_ascii_uppercase();
    let mut h = String::new();
    let _ = writeln!(h, "// Bundle for network '{network}' (function '{}').", plan.name);
    let _ = writeln!(h, "#ifndef _TERN_BUNDLE_{prefix}_H");
    let _ = writeln!(h, "#define _TERN_BUNDLE_{prefix}_H\n");
    let _ = writeln!(h, "#include <stdint.h>\n");
    let _ = writeln!(h, "#define {prefix}_CONSTANT_MEM_SIZE {constant_mem_size}");
    let _ = writeln!(h, "#define {prefix}_MUTABLE_MEM_SIZE {mutable_mem_size}");
    let _ = writeln!(h, "#define {prefix}_ACTIVATIONS_MEM_SIZE {activations_mem_size}");
    let _ = writeln!(h, "#define {prefix}_MEM_ALIGN {alignment}\n");
    let _ = writeln!(h, "// Placeholder offsets in mutableWeight.");
    for (ph, off) in phs.iter().zip(&ph_offsets) {
        let _ = writeln!(h, "#define {prefix}_{} {off}", c_ident(ph.name()));
    }
    let _ = writeln!(h, "\n#ifdef __cplusplus\nextern \"C\" {{\n#endif");
    let _ = writeln!(
        h,
        "int {network}(uint8_t *constantWeight, uint8_t *mutableWeight, uint8_t *activations);"
    );
    let _ = writeln!(h, "#ifdef __cplusplus\n}}\n#endif\n");
    let _ = writeln!(h, "#endif");

    // Weights
    let entries: Vec<WeightEntry> = plan
        .constants
        .iter()
        .zip(&const_offsets)
        .map(|((name, t), &offset)| WeightEntry {
            name: name.clone(),
            elem_kind: t.elem_kind().to_string(),
            dims: t.dims().to_vec(),
            offset,
            size: t.ty().size_in_bytes(),
        })
        .collect();
    let header = WeightsHeader {
        network: network.to_string(),
        alignment,
        constant_mem_size,
        constants: entries,
    };
    let json = serde_json::to_string(&header)
        .map_err(|e| bundle_err(format!("weights header: {e}")))?;

    let mut region = vec![0u8; constant_mem_size];
    for ((_, t), &offset) in plan.constants.iter().zip(&const_offsets) {
        let kind = t.elem_kind();
        let mut bytes = Vec::with_capacity(t.ty().size_in_bytes());
        for &v in t.data().iter() {
            kind.encode_le(v, &mut bytes);
        }
        region[offset..offset + bytes.len()].copy_from_slice(&bytes);
    }
    let mut weights = Vec::with_capacity(8 + json.len() + region.len());
    weights.extend_from_slice(&(json.len() as u64).to_le_bytes());
    weights.extend_from_slice(json.as_bytes());
    weights.extend_from_slice(&region);

    // Plan
    let mut p = String::new();
    let _ = writeln!(p, "entry {network}");
    let _ = writeln!(p, "function {}", plan.name);
    for (i, ((name, t), off)) in plan.constants.iter().zip(&const_offsets).enumerate() {
        let _ = writeln!(p, "constant c{i} {} : {} @ {off}", name, t.ty());
    }
    for (ph, off) in phs.iter().zip(&ph_offsets) {
        let _ = writeln!(p, "mutable @{} : {} @ {off}", ph.name(), ph.ty());
    }
    for (i, (ty, off)) in plan.slot_types.iter().zip(&slot_offsets).enumerate() {
        let _ = writeln!(p, "activation s{i} : {ty} @ {off}");
    }
    for instr in &plan.instructions {
        let _ = writeln!(p, "  {instr}");
    }

    let info = BundleInfo {
        header_path: dir.join(format!("{network}.h")),
        weights_path: dir.join(format!("{network}.weights")),
        plan_path: dir.join(format!("{network}.plan")),
        constant_mem_size,
        mutable_mem_size,
        activations_mem_size,
    };
    let files = [
        (info.header_path.as_path(), h.into_bytes()),
        (info.weights_path.as_path(), weights),
        (info.plan_path.as_path(), p.into_bytes()),
    ];
    write_all_or_none(&files).map_err(bundle_err)?;
    Ok(info)
}

/// Write every file under a `.tmp` name, then rename them into place.
/// On failure nothing written by this call is left in the directory.
fn write_all_or_none(files: &[(&Path, Vec<u8>)]) -> std::result::Result<(), String> {
    fn tmp_path(path: &Path) -> PathBuf {
        let mut name = path.as_os_str().to_owned();
        name.push(".tmp");
        PathBuf::from(name)
    }
    let cleanup = |upto: usize, renamed: usize| {
        for (i, (path, _)) in files[..upto].iter().enumerate() {
            let _ = fs::remove_file(if i < renamed { path.to_path_buf() } else { tmp_path(path) });
        }
    };

    for (i, (path, bytes)) in files.iter().enumerate() {
        let tmp = tmp_path(path);
        if let Err(e) = fs::write(&tmp, bytes) {
            cleanup(i + 1, 0);
            return Err(format!("cannot write {}: {e}", tmp.display()));
        }
    }
    for (i, (path, _)) in files.iter().enumerate() {
        if let Err(e) = fs::rename(tmp_path(path), path) {
            cleanup(files.len(), i);
            return Err(format!("cannot write {}: {e}", path.display()));
        }
    }
    Ok(())
}

/// Read back a `.weights` file: its header and the constant region.
pub fn read_weights(path: &Path) -> Result<(WeightsHeader, Vec<u8>)> {
    let bytes = fs::read(path)?;
    if bytes.len() < 8 {
        return Err(Error::msg(format!("{}: truncated weights file", path.display())));
    }
    let mut size_buf = [0u8; 8];
    size_buf.copy_from_slice(&bytes[..8]);
    let header_len = u64::from_le_bytes(size_buf) as usize;
    let json_end = 8usize
        .checked_add(header_len)
        .filter(|&end| end <= bytes.len())
        .ok_or_else(|| Error::msg(format!("{}: header runs past end of file", path.display())))?;
    let header: WeightsHeader = serde_json::from_slice(&bytes[8..json_end])
        .map_err(|e| Error::msg(format!("{}: invalid weights header: {e}", path.display())))?;
    Ok((header, bytes[json_end..].to_vec()))
}
