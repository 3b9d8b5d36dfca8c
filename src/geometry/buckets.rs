//! Geometry bucketing for the data-texture path.
//!
//! DTX index tables are byte-addressed textures whose stride is the
//! index width, so a geometry is split into buckets that each fit the
//! narrowest feasible width. Smaller widths mean fewer texels fetched per
//! triangle.

use rustc_hash::FxHashMap;

/// Index storage width of one bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndexWidth {
    U8,
    U16,
    U32,
}

impl IndexWidth {
    /// The narrowest width whose index space covers `vertex_count`
    /// vertices.
    #[must_use]
    pub fn for_vertex_count(vertex_count: usize) -> Self {
        if vertex_count <= 1 << 8 {
            IndexWidth::U8
        } else if vertex_count <= 1 << 16 {
            IndexWidth::U16
        } else {
            IndexWidth::U32
        }
    }

    #[must_use]
    pub fn bytes(self) -> u32 {
        match self {
            IndexWidth::U8 => 1,
            IndexWidth::U16 => 2,
            IndexWidth::U32 => 4,
        }
    }
}

/// One partition of a geometry, self-contained for texture packing.
#[derive(Debug, Clone)]
pub struct Bucket {
    /// Local vertex slice, flat `[x, y, z]` grid triples.
    pub positions_compressed: Vec<u16>,
    /// Item indices remapped into the local vertex space.
    pub indices: Vec<u32>,
    /// Edge pairs remapped the same way.
    pub edge_indices: Vec<u32>,
    pub index_width: IndexWidth,
}

impl Bucket {
    #[must_use]
    pub fn num_vertices(&self) -> u32 {
        (self.positions_compressed.len() / 3) as u32
    }
}

/// Tuning knobs for [`build_buckets`].
#[derive(Debug, Clone, Copy)]
pub struct BucketingOptions {
    /// Deduplicate identical grid triples before splitting.
    pub uniquify: bool,
    /// Split into 16-bit-addressable partitions; with this off the whole
    /// geometry becomes one bucket at whatever width it needs.
    pub rebucket: bool,
}

impl Default for BucketingOptions {
    fn default() -> Self {
        Self {
            uniquify: true,
            rebucket: true,
        }
    }
}

/// Maximum unique vertices per bucket when rebucketing: one 16-bit index
/// space.
const BUCKET_VERTEX_CAP: usize = 1 << 16;

/// Splits a geometry into index-width-bounded buckets.
///
/// `verts_per_item` is 3 for triangles, 2 for line segments, 1 for
/// points. With both options disabled the result is a single bucket
/// equal to the input.
#[must_use]
pub fn build_buckets(
    positions_compressed: &[u16],
    indices: &[u32],
    edge_indices: &[u32],
    verts_per_item: usize,
    options: BucketingOptions,
) -> Vec<Bucket> {
    let (positions, indices, edge_indices) = if options.uniquify {
        uniquify(positions_compressed, indices, edge_indices)
    } else {
        (
            positions_compressed.to_vec(),
            indices.to_vec(),
            edge_indices.to_vec(),
        )
    };

    let vertex_count = positions.len() / 3;
    if !options.rebucket || verts_per_item < 2 || vertex_count <= BUCKET_VERTEX_CAP {
        return vec![Bucket {
            index_width: IndexWidth::for_vertex_count(vertex_count),
            positions_compressed: positions,
            indices,
            edge_indices,
        }];
    }

    split(&positions, &indices, &edge_indices, verts_per_item)
}

struct Accumulator {
    remap: FxHashMap<u32, u32>,
    positions: Vec<u16>,
    indices: Vec<u32>,
    edge_indices: Vec<u32>,
}

impl Accumulator {
    fn new() -> Self {
        Self {
            remap: FxHashMap::default(),
            positions: Vec::new(),
            indices: Vec::new(),
            edge_indices: Vec::new(),
        }
    }

    fn local_index(&mut self, global: u32, source: &[u16]) -> u32 {
        if let Some(&local) = self.remap.get(&global) {
            return local;
        }
        let local = (self.positions.len() / 3) as u32;
        let base = global as usize * 3;
        self.positions
            .extend_from_slice(&source[base..base + 3]);
        self.remap.insert(global, local);
        local
    }

    fn into_bucket(self) -> Bucket {
        Bucket {
            index_width: IndexWidth::for_vertex_count(self.positions.len() / 3),
            positions_compressed: self.positions,
            indices: self.indices,
            edge_indices: self.edge_indices,
        }
    }
}

fn split(
    positions: &[u16],
    indices: &[u32],
    edge_indices: &[u32],
    verts_per_item: usize,
) -> Vec<Bucket> {
    let mut done: Vec<Accumulator> = Vec::new();
    let mut current = Accumulator::new();

    for item in indices.chunks_exact(verts_per_item) {
        let fresh = item
            .iter()
            .filter(|v| !current.remap.contains_key(v))
            .count();
        if current.remap.len() + fresh > BUCKET_VERTEX_CAP {
            done.push(std::mem::replace(&mut current, Accumulator::new()));
        }
        for &v in item {
            let local = current.local_index(v, positions);
            current.indices.push(local);
        }
    }
    done.push(current);

    // Every extracted edge shares a face with its endpoints, so some
    // bucket already holds both; caller-supplied stray edges fall back to
    // the first endpoint's bucket.
    for edge in edge_indices.chunks_exact(2) {
        let (a, b) = (edge[0], edge[1]);
        let host = done
            .iter()
            .position(|acc| acc.remap.contains_key(&a) && acc.remap.contains_key(&b))
            .or_else(|| done.iter().position(|acc| acc.remap.contains_key(&a)));
        if let Some(i) = host {
            let acc = &mut done[i];
            let la = acc.local_index(a, positions);
            let lb = acc.local_index(b, positions);
            acc.edge_indices.push(la);
            acc.edge_indices.push(lb);
        }
    }

    done.into_iter()
        .filter(|acc| !acc.indices.is_empty())
        .map(Accumulator::into_bucket)
        .collect()
}

fn uniquify(
    positions: &[u16],
    indices: &[u32],
    edge_indices: &[u32],
) -> (Vec<u16>, Vec<u32>, Vec<u32>) {
    let mut seen: FxHashMap<[u16; 3], u32> = FxHashMap::default();
    let mut unique_positions: Vec<u16> = Vec::new();
    // Old vertex index -> deduplicated index.
    let mut forward: Vec<u32> = Vec::with_capacity(positions.len() / 3);

    for triple in positions.chunks_exact(3) {
        let key = [triple[0], triple[1], triple[2]];
        let mapped = *seen.entry(key).or_insert_with(|| {
            let next = (unique_positions.len() / 3) as u32;
            unique_positions.extend_from_slice(triple);
            next
        });
        forward.push(mapped);
    }

    let remapped_indices = indices.iter().map(|&i| forward[i as usize]).collect();
    let remapped_edges = edge_indices.iter().map(|&i| forward[i as usize]).collect();
    (unique_positions, remapped_indices, remapped_edges)
}
