use crate::{
    consts::*,
    huffman::FrameReader,
    utils::{hash, Rgba},
    Channels, Colorspace, Header,
};
use alloc::vec::Vec;
use byteorder::{BigEndian, ByteOrder};
use snafu::{ensure, OptionExt, Snafu};

mod ops;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum DecodeError {
    #[snafu(display("input ended before the frame could be parsed"))]
    UnexpectedEof,
    #[snafu(display("missing qoif magic"))]
    InvalidMagic,
    #[snafu(display("invalid image dimensions: {width}x{height}"))]
    InvalidDimensions { width: u32, height: u32 },
    #[snafu(display("invalid channel count: {channels}"))]
    InvalidChannels { channels: u8 },
    #[snafu(display("invalid colorspace: {colorspace}"))]
    InvalidColorspace { colorspace: u8 },
    #[snafu(display("entropy dictionary is malformed"))]
    InvalidDictionary,
    #[snafu(display("input ended with pixels left to decode"))]
    TruncatedBody,
}

/// Parses and validates a frame header without touching the body.
pub fn decode_header(data: &[u8]) -> Result<Header, DecodeError> {
    parse_header(data).map(|(header, _)| header)
}

pub(crate) fn parse_header(data: &[u8]) -> Result<(Header, bool), DecodeError> {
    ensure!(
        data.len() >= QOI_HEADER_SIZE + QOI_PADDING.len(),
        UnexpectedEofSnafu
    );
    ensure!(data[..4] == QOI_MAGIC, InvalidMagicSnafu);

    let width = BigEndian::read_u32(&data[4..]);
    let height = BigEndian::read_u32(&data[8..]);
    let channels = data[12];
    let colorspace = data[13];

    let entropy_coded = colorspace & QOI_HUFF_ENCODED_BIT != 0;
    let colorspace = colorspace & !QOI_HUFF_ENCODED_BIT;

    let header = Header {
        width,
        height,
        channels: Channels::from_wire(channels).context(InvalidChannelsSnafu { channels })?,
        colorspace: Colorspace::from_wire(colorspace)
            .context(InvalidColorspaceSnafu { colorspace })?,
    };
    ensure!(
        width != 0 && height != 0 && header.within_pixel_budget(),
        InvalidDimensionsSnafu { width, height }
    );

    Ok((header, entropy_coded))
}

#[derive(Debug, Clone, Copy)]
pub struct QoihDecodeContext {
    pub px: Rgba,
    pub arr: [Rgba; 64],
}

impl QoihDecodeContext {
    pub const fn new() -> Self {
        Self {
            px: Rgba::START,
            arr: [Rgba::ZERO; 64],
        }
    }
}

impl Default for QoihDecodeContext {
    fn default() -> Self {
        Self::new()
    }
}

impl QoihDecodeContext {
    /// Decodes a qoih frame (plain or entropy-coded), appending raw pixels
    /// to `w` in the requested channel layout. `None` takes the channel
    /// count from the frame header.
    ///
    /// A truncated body is not an error: the remaining pixels are filled
    /// with the last decoded value. Use [`Self::decode_to_vec_strict`] to
    /// have that reported instead.
    pub fn decode_to_vec(
        data: &[u8],
        channels: Option<Channels>,
        w: &mut Vec<u8>,
    ) -> Result<Header, DecodeError> {
        Self::decode_frame(data, channels, w, false)
    }

    /// Like [`Self::decode_to_vec`], but fails with
    /// [`DecodeError::TruncatedBody`] when the input ends before the image
    /// is complete.
    pub fn decode_to_vec_strict(
        data: &[u8],
        channels: Option<Channels>,
        w: &mut Vec<u8>,
    ) -> Result<Header, DecodeError> {
        Self::decode_frame(data, channels, w, true)
    }

    fn decode_frame(
        data: &[u8],
        channels: Option<Channels>,
        w: &mut Vec<u8>,
        strict: bool,
    ) -> Result<Header, DecodeError> {
        let (header, entropy_coded) = parse_header(data)?;

        let channels = channels.unwrap_or(header.channels);
        let px_count = header.pixel_count();
        w.reserve(px_count * channels.bytes_per_pixel());

        let mut state = QoihDecodeContext::new();
        let complete = if entropy_coded {
            let reader = FrameReader::new(data)?;
            state.decode_chunks(reader, px_count, channels, w)
        } else {
            let body = &data[QOI_HEADER_SIZE..data.len() - QOI_PADDING.len()];
            state.decode_chunks(body.iter().copied(), px_count, channels, w)
        };
        ensure!(complete || !strict, TruncatedBodySnafu);

        Ok(header)
    }

    fn decode_chunks<I: Iterator<Item = u8>>(
        &mut self,
        mut bytes: I,
        px_count: usize,
        channels: Channels,
        w: &mut Vec<u8>,
    ) -> bool {
        let mut run = 0usize;
        let mut produced = 0usize;

        while produced < px_count {
            if run > 0 {
                run -= 1;
            } else if let Some(b1) = bytes.next() {
                match b1 {
                    QOI_OP_RGB => {
                        let (Some(r), Some(g), Some(b)) = (bytes.next(), bytes.next(), bytes.next())
                        else {
                            break;
                        };
                        self.px.r = r;
                        self.px.g = g;
                        self.px.b = b;
                    }
                    QOI_OP_RGBA => {
                        let (Some(r), Some(g), Some(b), Some(a)) =
                            (bytes.next(), bytes.next(), bytes.next(), bytes.next())
                        else {
                            break;
                        };
                        self.px = Rgba { r, g, b, a };
                    }
                    _ => match b1 & QOI_MASK_2 {
                        QOI_OP_INDEX => self.px = self.arr[usize::from(b1)],
                        QOI_OP_DIFF => self.px = ops::small_diff(self.px, b1),
                        QOI_OP_LUMA => {
                            let Some(b2) = bytes.next() else {
                                break;
                            };
                            self.px = ops::luma_diff(self.px, b1, b2);
                        }
                        _ => run = usize::from(b1 & 0x3f), // QOI_OP_RUN
                    },
                }

                // every consumed chunk refreshes the array slot of the pixel
                // it produced, runs and index hits included
                self.arr[usize::from(hash(self.px))] = self.px;
            } else {
                break;
            }

            self.px.push_to(channels, w);
            produced += 1;
        }

        // short input: pad out the image with the last decoded pixel
        let complete = produced == px_count;
        for _ in produced..px_count {
            self.px.push_to(channels, w);
        }

        complete
    }
}
