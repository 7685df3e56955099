//! Per-frame entropy layer: Huffman codes over the chunk-stream bytes, an
//! inline dictionary, and a two-tier decoder (flat table for short codes,
//! decision trees for the rest).

use crate::{
    consts::*,
    decode::{DecodeError, InvalidDictionarySnafu, UnexpectedEofSnafu},
};
use alloc::{vec, vec::Vec};
use byteorder::{BigEndian, ByteOrder, NativeEndian};
use snafu::{ensure, OptionExt};

const TABLE_LEN: usize = 1 << QOI_HUFF_TABLE_WIDTH;
const TREE_LEN: usize = 512;

/// Flat-table entries with this bit set point into the tree arena instead
/// of naming a (length, value) leaf.
const TREE_FLAG: u16 = 1 << 15;

/// Chunk streams smaller than this never amortize the dictionary.
const MIN_ENTROPY_STREAM: usize = 10 * 1024;

/// One code word, packed least-significant-bit first.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Code {
    bits: u32,
    len: u8,
}

#[derive(Debug, Clone, Copy)]
struct TreeNode {
    count: u32,
    left: i16,
    right: i16,
}

/// Array-backed binary min-heap of tree indices, keyed by node count.
struct MinHeap {
    items: [u16; 256],
    len: usize,
}

impl MinHeap {
    fn new() -> Self {
        Self {
            items: [0; 256],
            len: 0,
        }
    }

    fn insert(&mut self, tree: &[TreeNode], item: u16) {
        self.items[self.len] = item;
        let mut idx = self.len;
        self.len += 1;

        while idx > 0 {
            let upper = (idx - 1) / 2;
            if tree[usize::from(self.items[upper])].count < tree[usize::from(self.items[idx])].count
            {
                break;
            }
            self.items.swap(idx, upper);
            idx = upper;
        }
    }

    fn pop(&mut self, tree: &[TreeNode]) -> u16 {
        let item = self.items[0];
        self.len -= 1;
        if self.len == 0 {
            return item;
        }

        // move the last element to the top, then sift down
        self.items[0] = self.items[self.len];
        let mut idx = 0;
        loop {
            let left = idx * 2 + 1;
            if left >= self.len {
                break;
            }
            let right = left + 1;

            let cur = tree[usize::from(self.items[idx])].count;
            let left_count = tree[usize::from(self.items[left])].count;
            if right < self.len {
                let right_count = tree[usize::from(self.items[right])].count;
                if cur < left_count && cur < right_count {
                    break;
                }
                if right_count < left_count {
                    self.items.swap(right, idx);
                    idx = right;
                } else {
                    self.items.swap(left, idx);
                    idx = left;
                }
            } else {
                if left_count < cur {
                    self.items.swap(left, idx);
                }
                break;
            }
        }

        item
    }
}

/// Builds the per-byte code table from a chunk-stream histogram. Also
/// reports whether any code exceeded [`QOI_HUFF_MAX_CODE_BITS`], in which
/// case the frame has to stay plain.
fn build_code_table(histogram: &[u32; 256]) -> ([Code; 256], bool) {
    let mut tree = [TreeNode {
        count: 0,
        left: -1,
        right: -1,
    }; TREE_LEN];
    let mut heap = MinHeap::new();

    for value in 0..256 {
        tree[value].count = histogram[value];
        heap.insert(&tree, value as u16);
    }

    let mut next_free = 256;
    while heap.len > 1 {
        let left = heap.pop(&tree);
        let right = heap.pop(&tree);

        tree[next_free] = TreeNode {
            count: tree[usize::from(left)].count + tree[usize::from(right)].count,
            left: left as i16,
            right: right as i16,
        };
        heap.insert(&tree, next_free as u16);
        next_free += 1;
    }

    let root = heap.pop(&tree);
    let mut table = [Code::default(); 256];
    let mut overflow = false;
    assign_codes(&tree, &mut table, root, 0, 0, &mut overflow);

    (table, overflow)
}

fn assign_codes(
    tree: &[TreeNode],
    table: &mut [Code; 256],
    node: u16,
    bits: u64,
    len: u8,
    overflow: &mut bool,
) {
    if usize::from(node) < 256 {
        if len > QOI_HUFF_MAX_CODE_BITS {
            *overflow = true;
        }
        table[usize::from(node)] = Code {
            bits: bits as u32,
            len,
        };
        return;
    }

    let TreeNode { left, right, .. } = tree[usize::from(node)];
    // histograms dominated by zero counts degenerate into a chain deeper
    // than 64; those codes overflow anyway, so their bit patterns are moot
    let bit = if len < 64 { 1 << len } else { 0 };
    assign_codes(tree, table, left as u16, bits, len + 1, overflow);
    assign_codes(tree, table, right as u16, bits | bit, len + 1, overflow);
}

/// Entropy codes a plain frame. Returns `None` when the layer wouldn't pay
/// for itself, or a code word outgrew a 32-bit cell; the caller keeps the
/// plain frame in those cases.
pub(crate) fn compress_frame(frame: &[u8]) -> Option<Vec<u8>> {
    if frame.len() < MIN_ENTROPY_STREAM {
        return None;
    }

    let body = &frame[QOI_HEADER_SIZE..];
    let mut histogram = [0u32; 256];
    for &byte in body {
        histogram[usize::from(byte)] += 1;
    }

    let (table, overflow) = build_code_table(&histogram);
    if overflow {
        return None;
    }

    // dictionary ceiling plus the packed body, in bits
    let mut estimated_bits = (256 + 1024) as u64 * 8;
    for value in 0..256 {
        estimated_bits += u64::from(histogram[value]) * u64::from(table[value].len);
    }
    let estimated = estimated_bits / 8;
    if estimated * 100 > frame.len() as u64 * 97 {
        return None;
    }

    let mut out = Vec::with_capacity(estimated as usize + 64);
    out.extend_from_slice(&frame[..QOI_HEADER_SIZE - 1]);
    out.push(frame[QOI_HEADER_SIZE - 1] | QOI_HUFF_ENCODED_BIT);

    for code in &table {
        out.push(code.len);
        match code.len {
            0..=16 => {
                let mut buf = [0; 2];
                BigEndian::write_u16(&mut buf, code.bits as u16);
                out.extend_from_slice(&buf);
            }
            17..=24 => {
                let mut buf = [0; 3];
                BigEndian::write_u24(&mut buf, code.bits);
                out.extend_from_slice(&buf);
            }
            _ => {
                let mut buf = [0; 4];
                BigEndian::write_u32(&mut buf, code.bits);
                out.extend_from_slice(&buf);
            }
        }
    }

    // packed words begin at the next 32-bit boundary
    while out.len() % 4 != 0 {
        out.push(0);
    }

    let mut word = 0u32;
    let mut bit_idx = 0u32;
    for &byte in body {
        let Code { bits, len } = table[usize::from(byte)];
        let len = u32::from(len);

        word |= ((u64::from(bits) << bit_idx) & 0xffff_ffff) as u32;

        let next_bit_idx = bit_idx + len;
        if next_bit_idx >= 32 {
            push_word(&mut out, word);
            word = 0;
        }
        bit_idx = next_bit_idx % 32;

        // store the overflown bits in the new word
        if next_bit_idx > 32 {
            word |= bits >> (len - bit_idx);
        }
    }
    push_word(&mut out, word);

    // trailer word, keeps the decoder's two-word window in bounds
    push_word(&mut out, 0);

    Some(out)
}

fn push_word(out: &mut Vec<u8>, word: u32) {
    let mut buf = [0; 4];
    NativeEndian::write_u32(&mut buf, word);
    out.extend_from_slice(&buf);
}

#[derive(Debug, Clone, Copy)]
enum DecodeNode {
    Branch { left: i16, right: i16 },
    Leaf { len: u8, value: u8 },
}

/// Streams the chunk bytes of an entropy-coded frame.
///
/// Built from the inline dictionary: codes no longer than
/// [`QOI_HUFF_TABLE_WIDTH`] bits resolve through a flat table indexed by the
/// low window bits; longer codes share a table slot that routes into a
/// decision tree walked with the bits above the table width.
pub(crate) struct FrameReader<'a> {
    words: &'a [u8],
    word_idx: usize,
    bit_idx: u32,
    table: Vec<u16>,
    nodes: Vec<DecodeNode>,
}

impl<'a> FrameReader<'a> {
    /// Parses the dictionary following the frame header and positions the
    /// reader at the first packed word. `frame` is the whole frame; the
    /// word region's 32-bit alignment is relative to its start.
    pub(crate) fn new(frame: &'a [u8]) -> Result<Self, DecodeError> {
        let mut table = vec![0u16; TABLE_LEN];
        let mut nodes = Vec::with_capacity(TREE_LEN);
        let mut p = QOI_HEADER_SIZE;

        for value in 0..=255u8 {
            let len = *frame.get(p).context(UnexpectedEofSnafu)?;
            p += 1;

            let bits = match len {
                0..=16 => {
                    let raw = frame.get(p..p + 2).context(UnexpectedEofSnafu)?;
                    p += 2;
                    u32::from(BigEndian::read_u16(raw))
                }
                17..=24 => {
                    let raw = frame.get(p..p + 3).context(UnexpectedEofSnafu)?;
                    p += 3;
                    BigEndian::read_u24(raw)
                }
                25..=32 => {
                    let raw = frame.get(p..p + 4).context(UnexpectedEofSnafu)?;
                    p += 4;
                    BigEndian::read_u32(raw)
                }
                _ => return InvalidDictionarySnafu.fail(),
            };

            // length zero marks a byte value absent from the stream
            if len == 0 {
                continue;
            }
            ensure!(u64::from(bits) >> len == 0, InvalidDictionarySnafu);

            if u32::from(len) <= QOI_HUFF_TABLE_WIDTH {
                // every index whose low `len` bits equal the code gets the leaf
                let span = 1 << (QOI_HUFF_TABLE_WIDTH - u32::from(len));
                for i in 0..span {
                    let idx = (i << len) | bits as usize;
                    ensure!(table[idx] == 0, InvalidDictionarySnafu);
                    table[idx] = u16::from(len) << 8 | u16::from(value);
                }
            } else {
                Self::insert_long_code(&mut table, &mut nodes, bits, len, value)?;
            }
        }

        let word_base = (p + 3) & !3;
        ensure!(word_base <= frame.len(), UnexpectedEofSnafu);

        Ok(Self {
            words: &frame[word_base..],
            word_idx: 0,
            bit_idx: 0,
            table,
            nodes,
        })
    }

    /// Grows the decision tree reached through the flat-table slot of the
    /// code's low bits, attaching a leaf at the end of its remaining bits.
    fn insert_long_code(
        table: &mut [u16],
        nodes: &mut Vec<DecodeNode>,
        bits: u32,
        len: u8,
        value: u8,
    ) -> Result<(), DecodeError> {
        let leading_len = u32::from(len) - QOI_HUFF_TABLE_WIDTH;
        let truncated = (bits as usize) & (TABLE_LEN - 1);
        let mut leading = bits >> QOI_HUFF_TABLE_WIDTH;

        let entry = table[truncated];
        let root = if entry == 0 {
            let root = Self::alloc_node(nodes, DecodeNode::Branch { left: -1, right: -1 })?;
            table[truncated] = TREE_FLAG | root as u16;
            root
        } else {
            ensure!(entry & TREE_FLAG != 0, InvalidDictionarySnafu);
            usize::from(entry & !TREE_FLAG)
        };

        let mut node = root;
        for i in 0..leading_len {
            let bit = leading & 1 != 0;
            leading >>= 1;

            if i == leading_len - 1 {
                let leaf = Self::alloc_node(nodes, DecodeNode::Leaf { len, value })?;
                Self::attach(nodes, node, bit, leaf)?;
            } else {
                node = match Self::child(nodes, node, bit)? {
                    Some(next) => next,
                    None => {
                        let next =
                            Self::alloc_node(nodes, DecodeNode::Branch { left: -1, right: -1 })?;
                        Self::attach(nodes, node, bit, next)?;
                        next
                    }
                };
            }
        }

        Ok(())
    }

    fn alloc_node(nodes: &mut Vec<DecodeNode>, node: DecodeNode) -> Result<usize, DecodeError> {
        ensure!(nodes.len() < TREE_LEN, InvalidDictionarySnafu);
        nodes.push(node);
        Ok(nodes.len() - 1)
    }

    fn attach(
        nodes: &mut [DecodeNode],
        parent: usize,
        bit: bool,
        child: usize,
    ) -> Result<(), DecodeError> {
        let DecodeNode::Branch { left, right } = &mut nodes[parent] else {
            return InvalidDictionarySnafu.fail();
        };
        let slot = if bit { right } else { left };
        ensure!(*slot < 0, InvalidDictionarySnafu);
        *slot = child as i16;
        Ok(())
    }

    fn child(nodes: &[DecodeNode], parent: usize, bit: bool) -> Result<Option<usize>, DecodeError> {
        let DecodeNode::Branch { left, right } = nodes[parent] else {
            return InvalidDictionarySnafu.fail();
        };
        let idx = if bit { right } else { left };
        Ok((idx >= 0).then(|| idx as usize))
    }

    fn word(&self, idx: usize) -> u32 {
        NativeEndian::read_u32(&self.words[idx * 4..])
    }

    fn next_byte(&mut self) -> Option<u8> {
        // the 64-bit window needs two whole words
        if (self.word_idx + 2) * 4 > self.words.len() {
            return None;
        }

        let window = u64::from(self.word(self.word_idx))
            | u64::from(self.word(self.word_idx + 1)) << 32;
        let window = window >> self.bit_idx;

        let leading = (window as usize) & (TABLE_LEN - 1);
        let entry = self.table[leading];
        if entry == 0 {
            // prefix no code starts with: malformed stream
            return None;
        }

        let (value, len) = if entry & TREE_FLAG == 0 {
            (entry as u8, u32::from(entry >> 8))
        } else {
            let mut trailing = window >> QOI_HUFF_TABLE_WIDTH;
            let mut node = usize::from(entry & !TREE_FLAG);
            loop {
                match self.nodes[node] {
                    DecodeNode::Leaf { len, value } => break (value, u32::from(len)),
                    DecodeNode::Branch { left, right } => {
                        let next = if trailing & 1 != 0 { right } else { left };
                        if next < 0 {
                            return None;
                        }
                        node = next as usize;
                        trailing >>= 1;
                    }
                }
            }
        };

        self.bit_idx += len;
        if self.bit_idx >= 32 {
            self.word_idx += 1;
        }
        self.bit_idx %= 32;

        Some(value)
    }
}

impl Iterator for FrameReader<'_> {
    type Item = u8;

    fn next(&mut self) -> Option<u8> {
        self.next_byte()
    }
}
