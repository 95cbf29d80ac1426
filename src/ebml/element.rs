use crate::common::error::{Result, TagError};
use crate::common::io::TagFile;
use crate::ebml::vint;

/// Reserved id for void (padding) elements. Their content is ignored and may
/// be reused when inserting new elements.
pub const VOID_ID: u64 = 0xEC;

/// Stable handle into the document's element arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ElemRef(pub(crate) usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PopulateState {
    Unpopulated,
    Populating,
    Populated,
}

/// One element in the tree. Parent and children are arena indices, never
/// owning pointers.
#[derive(Debug)]
struct Node {
    id: u64,
    /// Byte position of the element's first header byte.
    header_pos: u64,
    /// Byte position where the content begins.
    data_pos: u64,
    /// Declared content size in bytes.
    data_size: u64,
    /// Encoded width of the size field. Zero for the synthetic root.
    size_len: usize,
    parent: Option<ElemRef>,
    children: Vec<ElemRef>,
    state: PopulateState,
    /// Detached from the tree (removed or overwritten); kept in the arena so
    /// handles stay stable.
    dead: bool,
}

impl Node {
    /// Total on-disk span: header plus content.
    fn span(&self) -> u64 {
        (self.data_pos - self.header_pos) + self.data_size
    }
}

/// An open EBML document: one file handle, one element arena, one root.
///
/// The root is a synthetic element spanning the whole file; real top-level
/// elements (the EBML header, the Segment) are its children. Exactly one
/// document may be open per file at a time; two trees splicing the same byte
/// ranges would corrupt each other.
#[derive(Debug)]
pub struct EbmlDocument {
    file: TagFile,
    nodes: Vec<Node>,
    root: ElemRef,
    valid: bool,
}

impl EbmlDocument {
    /// Build a document over an already-opened file. The first four bytes
    /// must carry the EBML magic.
    pub fn new(mut file: TagFile) -> Result<Self> {
        let magic = file.read_block_at(0, 4)?;
        if magic != [0x1A, 0x45, 0xDF, 0xA3] {
            file.set_valid(false);
            return Err(TagError::Ebml("missing EBML header magic".into()));
        }

        let length = file.length()?;
        let root_node = Node {
            id: 0,
            header_pos: 0,
            data_pos: 0,
            data_size: length,
            size_len: 0,
            parent: None,
            children: Vec::new(),
            state: PopulateState::Unpopulated,
            dead: false,
        };

        Ok(EbmlDocument {
            file,
            nodes: vec![root_node],
            root: ElemRef(0),
            valid: true,
        })
    }

    pub fn open(path: impl AsRef<std::path::Path>) -> Result<Self> {
        Self::new(TagFile::open(path)?)
    }

    pub fn root(&self) -> ElemRef {
        self.root
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    pub fn id(&self, r: ElemRef) -> u64 {
        self.nodes[r.0].id
    }

    pub fn content_size(&self, r: ElemRef) -> u64 {
        self.nodes[r.0].data_size
    }

    pub fn content_position(&self, r: ElemRef) -> u64 {
        self.nodes[r.0].data_pos
    }

    pub fn header_position(&self, r: ElemRef) -> u64 {
        self.nodes[r.0].header_pos
    }

    pub fn parent(&self, r: ElemRef) -> Option<ElemRef> {
        self.nodes[r.0].parent
    }

    /// Parse the element's children. Re-entrant calls after the first are
    /// no-ops; structural corruption marks the whole document invalid.
    pub fn populate(&mut self, r: ElemRef) -> Result<()> {
        if !self.valid {
            return Err(TagError::InvalidFile);
        }
        match self.nodes[r.0].state {
            PopulateState::Populated | PopulateState::Populating => return Ok(()),
            PopulateState::Unpopulated => {}
        }
        self.nodes[r.0].state = PopulateState::Populating;

        let mut pos = self.nodes[r.0].data_pos;
        let end = pos + self.nodes[r.0].data_size;

        while pos < end {
            // An id and a size field are at most 8 bytes each.
            let avail = (end - pos).min(16) as usize;
            let header = self.file.read_block_at(pos, avail)?;

            let Some((id, id_len)) = vint::read_vint(&header, true) else {
                self.valid = false;
                self.nodes[r.0].state = PopulateState::Unpopulated;
                return Err(TagError::EbmlMalformedVint);
            };
            let Some((size, size_len)) = vint::read_vint(&header[id_len..], false) else {
                self.valid = false;
                self.nodes[r.0].state = PopulateState::Unpopulated;
                return Err(TagError::EbmlMalformedVint);
            };

            let data_pos = pos + (id_len + size_len) as u64;
            if data_pos + size > end {
                self.valid = false;
                self.nodes[r.0].state = PopulateState::Unpopulated;
                return Err(TagError::Ebml(format!(
                    "element {id:#x} at {pos} overruns its parent"
                )));
            }

            let child = ElemRef(self.nodes.len());
            self.nodes.push(Node {
                id,
                header_pos: pos,
                data_pos,
                data_size: size,
                size_len,
                parent: Some(r),
                children: Vec::new(),
                state: PopulateState::Unpopulated,
                dead: false,
            });
            self.nodes[r.0].children.push(child);

            pos = data_pos + size;
        }

        self.nodes[r.0].state = PopulateState::Populated;
        Ok(())
    }

    /// First child with the given id, populating on demand.
    pub fn get_child(&mut self, parent: ElemRef, id: u64) -> Result<Option<ElemRef>> {
        self.populate(parent)?;
        Ok(self.nodes[parent.0]
            .children
            .iter()
            .copied()
            .find(|&c| self.nodes[c.0].id == id))
    }

    /// All children with the given id.
    pub fn get_children(&mut self, parent: ElemRef, id: u64) -> Result<Vec<ElemRef>> {
        self.populate(parent)?;
        Ok(self.nodes[parent.0]
            .children
            .iter()
            .copied()
            .filter(|&c| self.nodes[c.0].id == id)
            .collect())
    }

    /// All children in on-disk order.
    pub fn children(&mut self, parent: ElemRef) -> Result<Vec<ElemRef>> {
        self.populate(parent)?;
        Ok(self.nodes[parent.0].children.clone())
    }

    // -- typed readers ------------------------------------------------------

    pub fn read_binary(&mut self, r: ElemRef) -> Result<Vec<u8>> {
        let node = &self.nodes[r.0];
        let (pos, size) = (node.data_pos, node.data_size);
        self.file.read_block_at(pos, size as usize)
    }

    /// Content decoded as UTF-8, trailing NUL padding stripped.
    pub fn read_string(&mut self, r: ElemRef) -> Result<String> {
        let raw = self.read_binary(r)?;
        let end = raw.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);
        Ok(String::from_utf8_lossy(&raw[..end]).into_owned())
    }

    /// Content as a big-endian unsigned integer. Widths over 8 bytes are
    /// unsupported and read as zero.
    pub fn read_unsigned(&mut self, r: ElemRef) -> Result<u64> {
        let raw = self.read_binary(r)?;
        if raw.len() > 8 {
            log::warn!(
                "unsigned element {:#x} has unsupported width {}",
                self.nodes[r.0].id,
                raw.len()
            );
            return Ok(0);
        }
        Ok(raw.iter().fold(0u64, |acc, &b| (acc << 8) | b as u64))
    }

    /// Content as a sign-extended big-endian integer.
    pub fn read_int(&mut self, r: ElemRef) -> Result<i64> {
        let raw = self.read_binary(r)?;
        if raw.is_empty() || raw.len() > 8 {
            if raw.len() > 8 {
                log::warn!(
                    "signed element {:#x} has unsupported width {}",
                    self.nodes[r.0].id,
                    raw.len()
                );
            }
            return Ok(0);
        }
        let mut value = if raw[0] & 0x80 != 0 { -1i64 } else { 0 };
        for &b in &raw {
            value = (value << 8) | b as i64;
        }
        Ok(value)
    }

    /// Content as a float. Dispatches on width: 4 (single), 8 (double) or
    /// 10 bytes (80-bit extended). Anything else reads as zero with a
    /// diagnostic, never an error.
    pub fn read_float(&mut self, r: ElemRef) -> Result<f64> {
        let raw = self.read_binary(r)?;
        match raw.len() {
            4 => Ok(f32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]) as f64),
            8 => Ok(f64::from_be_bytes([
                raw[0], raw[1], raw[2], raw[3], raw[4], raw[5], raw[6], raw[7],
            ])),
            10 => Ok(decode_extended_float(&raw)),
            n => {
                log::warn!(
                    "float element {:#x} has unsupported width {n}",
                    self.nodes[r.0].id
                );
                Ok(0.0)
            }
        }
    }

    // -- mutators -----------------------------------------------------------

    /// Append a new child with raw `content` to `parent`.
    ///
    /// An existing void child large enough to hold the new element is reused
    /// first (best fit: the smallest sufficient one). Only when no void fits
    /// is the file grown by a true insertion at the end of the parent's
    /// content, with every ancestor's declared size rewritten on the way up.
    pub fn add_element(&mut self, parent: ElemRef, id: u64, content: &[u8]) -> Result<ElemRef> {
        self.populate(parent)?;

        let mut bytes = vint::write_id(id);
        bytes.extend_from_slice(&vint::write_vint(content.len() as u64));
        let header_len = bytes.len();
        bytes.extend_from_slice(content);
        let needed = bytes.len() as u64;

        if let Some(void) = self.best_fit_void(parent, needed) {
            return self.fill_void(void, id, &bytes, header_len);
        }

        // No reusable padding: grow the parent at the end of its content.
        let pos = self.nodes[parent.0].data_pos + self.nodes[parent.0].data_size;
        self.file.insert(&bytes, pos, 0)?;
        self.shift_nodes(pos, needed as i64);

        let child = ElemRef(self.nodes.len());
        self.nodes.push(Node {
            id,
            header_pos: pos,
            data_pos: pos + header_len as u64,
            data_size: content.len() as u64,
            size_len: header_len - vint::id_length(id),
            parent: Some(parent),
            children: Vec::new(),
            state: PopulateState::Unpopulated,
            dead: false,
        });
        self.nodes[parent.0].children.push(child);

        self.grow(parent, needed as i64)?;
        Ok(child)
    }

    pub fn add_string(&mut self, parent: ElemRef, id: u64, value: &str) -> Result<ElemRef> {
        self.add_element(parent, id, value.as_bytes())
    }

    pub fn add_unsigned(&mut self, parent: ElemRef, id: u64, value: u64) -> Result<ElemRef> {
        self.add_element(parent, id, &encode_unsigned(value))
    }

    pub fn add_int(&mut self, parent: ElemRef, id: u64, value: i64) -> Result<ElemRef> {
        self.add_element(parent, id, &encode_signed(value))
    }

    /// Remove a child. With `use_void` the element is converted in place into
    /// a void placeholder of the same span (no bytes shift); otherwise, or
    /// when the span is too small to hold a void header, the byte range is
    /// physically removed and every ancestor shrinks.
    pub fn remove_child(&mut self, parent: ElemRef, child: ElemRef, use_void: bool) -> Result<()> {
        self.populate(parent)?;
        if self.nodes[child.0].parent != Some(parent) || self.nodes[child.0].dead {
            return Err(TagError::Ebml("element is not a child of this parent".into()));
        }

        let span = self.nodes[child.0].span();

        if use_void && span >= 2 {
            let header = void_header(span);
            self.file
                .write_block_at(self.nodes[child.0].header_pos, &header)?;

            self.detach_descendants(child);
            let node = &mut self.nodes[child.0];
            node.id = VOID_ID;
            node.size_len = header.len() - 1;
            node.data_pos = node.header_pos + header.len() as u64;
            node.data_size = span - header.len() as u64;
            node.state = PopulateState::Populated;
            return Ok(());
        }

        let start = self.nodes[child.0].header_pos;
        self.file.remove_block(start, span)?;
        self.detach_descendants(child);
        self.nodes[child.0].dead = true;
        self.nodes[parent.0].children.retain(|&c| c != child);
        self.shift_nodes(start, -(span as i64));
        self.grow(parent, -(span as i64))?;
        Ok(())
    }

    /// Replace the element's content, resizing through the same ancestor
    /// propagation as insertion when the length changes.
    pub fn set_binary(&mut self, r: ElemRef, content: &[u8]) -> Result<()> {
        if !self.valid {
            return Err(TagError::InvalidFile);
        }
        let old_size = self.nodes[r.0].data_size;
        let data_pos = self.nodes[r.0].data_pos;
        let new_size = content.len() as u64;

        if new_size == old_size {
            self.file.write_block_at(data_pos, content)?;
            self.detach_descendants(r);
            self.nodes[r.0].state = PopulateState::Unpopulated;
            return Ok(());
        }

        self.file.insert(content, data_pos, old_size)?;
        self.detach_descendants(r);
        self.nodes[r.0].state = PopulateState::Unpopulated;
        self.shift_nodes(data_pos + old_size, new_size as i64 - old_size as i64);

        let mut delta = new_size as i64 - old_size as i64;
        delta += self.rewrite_size_field(r, new_size)?;
        self.nodes[r.0].data_size = new_size;
        if let Some(parent) = self.nodes[r.0].parent {
            self.grow(parent, delta)?;
        }
        Ok(())
    }

    pub fn set_string(&mut self, r: ElemRef, value: &str) -> Result<()> {
        self.set_binary(r, value.as_bytes())
    }

    pub fn set_unsigned(&mut self, r: ElemRef, value: u64) -> Result<()> {
        self.set_binary(r, &encode_unsigned(value))
    }

    pub fn set_int(&mut self, r: ElemRef, value: i64) -> Result<()> {
        self.set_binary(r, &encode_signed(value))
    }

    // -- internals ----------------------------------------------------------

    /// Smallest void child of `parent` whose span can hold `needed` bytes:
    /// either exactly, or with at least two bytes left for a trailing void
    /// header.
    fn best_fit_void(&self, parent: ElemRef, needed: u64) -> Option<ElemRef> {
        self.nodes[parent.0]
            .children
            .iter()
            .copied()
            .filter(|&c| {
                let node = &self.nodes[c.0];
                let span = node.span();
                node.id == VOID_ID && (span == needed || span >= needed + 2)
            })
            .min_by_key(|&c| self.nodes[c.0].span())
    }

    /// Write the new element over the front of a void, shrinking the void to
    /// whatever span remains. The file's total length never changes here.
    fn fill_void(
        &mut self,
        void: ElemRef,
        id: u64,
        bytes: &[u8],
        header_len: usize,
    ) -> Result<ElemRef> {
        let void_pos = self.nodes[void.0].header_pos;
        let span = self.nodes[void.0].span();
        let needed = bytes.len() as u64;

        self.file.write_block_at(void_pos, bytes)?;

        let parent = self.nodes[void.0].parent.expect("void has a parent");
        let idx = self.nodes[parent.0]
            .children
            .iter()
            .position(|&c| c == void)
            .expect("void is in its parent's child list");

        if span == needed {
            // Exact fit: the void becomes the new element.
            let node = &mut self.nodes[void.0];
            node.id = id;
            node.size_len = header_len - vint::id_length(id);
            node.data_pos = void_pos + header_len as u64;
            node.data_size = needed - header_len as u64;
            node.state = PopulateState::Unpopulated;
            return Ok(void);
        }

        // Shrink the void in place behind the new element. Its padding bytes
        // are left untouched; only the header is rewritten.
        let remaining = span - needed;
        let header = void_header(remaining);
        self.file.write_block_at(void_pos + needed, &header)?;
        {
            let node = &mut self.nodes[void.0];
            node.header_pos = void_pos + needed;
            node.size_len = header.len() - 1;
            node.data_pos = node.header_pos + header.len() as u64;
            node.data_size = remaining - header.len() as u64;
        }

        let child = ElemRef(self.nodes.len());
        self.nodes.push(Node {
            id,
            header_pos: void_pos,
            data_pos: void_pos + header_len as u64,
            data_size: needed - header_len as u64,
            size_len: header_len - vint::id_length(id),
            parent: Some(parent),
            children: Vec::new(),
            state: PopulateState::Unpopulated,
            dead: false,
        });
        self.nodes[parent.0].children.insert(idx, child);
        Ok(child)
    }

    /// Propagate a content-size delta up the ancestor chain, rewriting each
    /// ancestor's size field in place when it still fits its width and
    /// widening the header (shifting subsequent bytes) when it does not.
    fn grow(&mut self, from: ElemRef, mut delta: i64) -> Result<()> {
        if delta == 0 {
            return Ok(());
        }
        let mut cursor = Some(from);
        while let Some(r) = cursor {
            if r == self.root {
                let node = &mut self.nodes[r.0];
                node.data_size = (node.data_size as i64 + delta) as u64;
                break;
            }
            let new_size = (self.nodes[r.0].data_size as i64 + delta) as u64;
            delta += self.rewrite_size_field(r, new_size)?;
            self.nodes[r.0].data_size = new_size;
            cursor = self.nodes[r.0].parent;
        }
        Ok(())
    }

    /// Rewrite one element's size field for `new_size`. Returns the number of
    /// bytes the header widened by (zero for the in-place case).
    fn rewrite_size_field(&mut self, r: ElemRef, new_size: u64) -> Result<i64> {
        let id_len = vint::id_length(self.nodes[r.0].id);
        let size_pos = self.nodes[r.0].header_pos + id_len as u64;
        let width = self.nodes[r.0].size_len;

        if let Some(field) = vint::write_vint_width(new_size, width) {
            self.file.write_block_at(size_pos, &field)?;
            return Ok(0);
        }

        // The grown size no longer fits the old field: widen the header,
        // shifting everything after the old size field.
        let new_width = vint::vint_length(new_size);
        let field = vint::write_vint_width(new_size, new_width)
            .ok_or(TagError::EbmlMalformedVint)?;
        self.file.insert(&field, size_pos, width as u64)?;

        let widen = (new_width - width) as i64;
        self.shift_nodes(size_pos + width as u64, widen);
        let node = &mut self.nodes[r.0];
        node.size_len = new_width;
        node.data_pos = size_pos + new_width as u64;
        Ok(widen)
    }

    /// Adjust cached offsets after a splice at `at` with the given delta.
    /// Elements that start at or after the splice point move whole; elements
    /// whose content merely extends across it keep their header position.
    fn shift_nodes(&mut self, at: u64, delta: i64) {
        for node in &mut self.nodes {
            if node.dead {
                continue;
            }
            if node.header_pos >= at {
                node.header_pos = (node.header_pos as i64 + delta) as u64;
                node.data_pos = (node.data_pos as i64 + delta) as u64;
            } else if node.data_pos > at {
                node.data_pos = (node.data_pos as i64 + delta) as u64;
            }
        }
    }

    /// Mark every descendant dead and clear the child list. Their bytes are
    /// handled by the caller.
    fn detach_descendants(&mut self, r: ElemRef) {
        let mut stack = std::mem::take(&mut self.nodes[r.0].children);
        while let Some(c) = stack.pop() {
            self.nodes[c.0].dead = true;
            stack.append(&mut std::mem::take(&mut self.nodes[c.0].children));
        }
    }
}

/// Header bytes for a void element filling exactly `span` bytes (content
/// padding excluded from the returned buffer). `span` must be at least 2.
fn void_header(span: u64) -> Vec<u8> {
    debug_assert!(span >= 2);
    for width in 1..=8usize {
        let content = span as i64 - 1 - width as i64;
        if content < 0 {
            continue;
        }
        if let Some(field) = vint::write_vint_width(content as u64, width) {
            let mut header = Vec::with_capacity(1 + width);
            header.push(VOID_ID as u8);
            header.extend_from_slice(&field);
            return header;
        }
    }
    // span >= 2 always admits a width-1 field for spans below 129 bytes and
    // wider fields beyond; unreachable in practice.
    vec![VOID_ID as u8, 0x80]
}

/// Big-endian unsigned encoding, shortest width, at least one byte.
fn encode_unsigned(value: u64) -> Vec<u8> {
    let mut width = 1usize;
    while width < 8 && value >= (1u64 << (8 * width)) {
        width += 1;
    }
    let mut out = vec![0u8; width];
    let mut v = value;
    for i in (0..width).rev() {
        out[i] = (v & 0xFF) as u8;
        v >>= 8;
    }
    out
}

/// Big-endian two's-complement encoding, shortest width preserving the sign.
fn encode_signed(value: i64) -> Vec<u8> {
    let mut width = 1usize;
    while width < 8 {
        let min = -(1i64 << (8 * width - 1));
        let max = (1i64 << (8 * width - 1)) - 1;
        if (min..=max).contains(&value) {
            break;
        }
        width += 1;
    }
    let mut out = vec![0u8; width];
    let mut v = value;
    for i in (0..width).rev() {
        out[i] = (v & 0xFF) as u8;
        v >>= 8;
    }
    out
}

/// Decode an 80-bit x87 extended float: 1 sign bit, 15 exponent bits, 64
/// mantissa bits with an explicit integer bit.
fn decode_extended_float(raw: &[u8]) -> f64 {
    let sign = if raw[0] & 0x80 != 0 { -1.0 } else { 1.0 };
    let exponent = (((raw[0] & 0x7F) as i32) << 8) | raw[1] as i32;
    let mantissa = raw[2..10]
        .iter()
        .fold(0u64, |acc, &b| (acc << 8) | b as u64);

    if exponent == 0 && mantissa == 0 {
        return 0.0;
    }
    if exponent == 0x7FFF {
        return if mantissa << 1 == 0 {
            sign * f64::INFINITY
        } else {
            f64::NAN
        };
    }

    sign * (mantissa as f64) * ((exponent - 16383 - 63) as f64).exp2()
}
