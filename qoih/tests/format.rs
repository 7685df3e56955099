use qoih::{
    consts::{QOI_HEADER_SIZE, QOI_MAGIC, QOI_PADDING},
    decode::{decode_header, DecodeError},
    encode::EncodeError,
    Channels, Colorspace, Header, QoihDecodeContext, QoihEncodeContext,
};

fn encode(header: Header, pixels: &[u8]) -> Vec<u8> {
    let mut encoded = Vec::new();
    QoihEncodeContext::encode_plain_to_vec(header, pixels, &mut encoded).unwrap();
    encoded
}

fn body_of(encoded: &[u8]) -> &[u8] {
    &encoded[QOI_HEADER_SIZE..encoded.len() - QOI_PADDING.len()]
}

fn header(width: u32, height: u32, channels: Channels) -> Header {
    Header {
        width,
        height,
        channels,
        colorspace: Colorspace::Srgb,
    }
}

#[test]
fn one_opaque_black_pixel_is_a_run() {
    // equals the implicit previous pixel, so the whole image is RUN(1)
    let encoded = encode(header(1, 1, Channels::Rgba), &[0, 0, 0, 255]);
    assert_eq!(encoded.len(), 23);
    assert_eq!(body_of(&encoded), [0xC0]);
    assert_eq!(&encoded[..4], &QOI_MAGIC);
    assert_eq!(&encoded[4..8], &1u32.to_be_bytes());
    assert_eq!(&encoded[8..12], &1u32.to_be_bytes());
    assert_eq!(encoded[12], 4);
    assert_eq!(encoded[13], 0);
    assert_eq!(&encoded[15..], &QOI_PADDING);
}

#[test]
fn two_opaque_black_pixels_merge_into_one_run() {
    let encoded = encode(header(2, 1, Channels::Rgba), &[0, 0, 0, 255, 0, 0, 0, 255]);
    assert_eq!(encoded.len(), 23);
    assert_eq!(body_of(&encoded), [0xC1]);
}

#[test]
fn small_delta_pixel_becomes_luma() {
    // deltas (1, 2, 3) from black: green delta exceeds the DIFF range
    let encoded = encode(header(1, 1, Channels::Rgb), &[1, 2, 3]);
    assert_eq!(encoded.len(), 24);
    assert_eq!(body_of(&encoded), [0xA2, 0x79]);
}

#[test]
fn diff_wins_over_luma_and_rgb() {
    // deltas (1, 1, 0) fit DIFF even though LUMA would fit too
    let encoded = encode(header(1, 1, Channels::Rgb), &[1, 1, 0]);
    assert_eq!(body_of(&encoded), [0x40 | 3 << 4 | 3 << 2 | 2]);
}

#[test]
fn equal_deltas_of_ten_become_luma_then_run() {
    // (10, 10, 10) stays within the LUMA green range; the repeat is a run
    let encoded = encode(header(2, 1, Channels::Rgb), &[10, 10, 10, 10, 10, 10]);
    assert_eq!(body_of(&encoded), [0x80 | (10 + 32), 0x88, 0xC0]);
    assert_eq!(encoded.len(), 25);
}

#[test]
fn wide_deltas_fall_through_to_rgb() {
    let encoded = encode(header(1, 1, Channels::Rgb), &[100, 5, 200]);
    assert_eq!(body_of(&encoded), [0xFE, 100, 5, 200]);
}

#[test]
fn alpha_change_forces_rgba() {
    let encoded = encode(header(1, 1, Channels::Rgba), &[1, 1, 1, 128]);
    assert_eq!(body_of(&encoded), [0xFF, 1, 1, 1, 128]);
}

#[test]
fn luma_deltas_are_computed_before_the_wraparound_check() {
    // 1 - 2 wraps to 255, which is delta -1 and still fits DIFF
    let encoded = encode(header(2, 1, Channels::Rgb), &[2, 2, 2, 1, 1, 1]);
    let body = body_of(&encoded);
    // first pixel: LUMA with vg = 2; second: DIFF with all deltas -1
    assert_eq!(body, [0x80 | (2 + 32), 0x88, 0x40 | 1 << 4 | 1 << 2 | 1]);
}

#[test]
fn cached_pixel_is_reused_via_index() {
    // A, B, A: the third pixel hits the slot the first one filled
    let a = [100, 5, 200];
    let b = [10, 220, 30];
    let pixels: Vec<u8> = [a, b, a].concat();
    let encoded = encode(header(3, 1, Channels::Rgb), &pixels);
    let body = body_of(&encoded);

    let hash_a = (100usize * 3 + 5 * 5 + 200 * 7 + 255 * 11) % 64;
    assert_eq!(body[..4], [0xFE, 100, 5, 200]);
    assert_eq!(*body.last().unwrap(), hash_a as u8);
}

#[test]
fn zero_alpha_black_first_pixel_hits_array_slot_zero() {
    // {0,0,0,0} hashes to 0 and the array starts zeroed, so the very first
    // pixel can be an INDEX chunk
    let encoded = encode(header(1, 1, Channels::Rgba), &[0, 0, 0, 0]);
    assert_eq!(body_of(&encoded), [0x00]);

    let mut decoded = Vec::new();
    QoihDecodeContext::decode_to_vec(&encoded, None, &mut decoded).unwrap();
    assert_eq!(decoded, [0, 0, 0, 0]);
}

#[test]
fn runs_cap_at_62_and_never_alias_the_8_bit_tags() {
    // 1 literal pixel, then a 199-long run: 62 + 62 + 62 + 13
    let pixels = [7u8, 100, 200].repeat(200);
    let encoded = encode(header(200, 1, Channels::Rgb), &pixels);
    let body = body_of(&encoded);
    assert_eq!(body[..4], [0xFE, 7, 100, 200]);
    let runs = &body[4..];
    assert_eq!(runs, [0xFD, 0xFD, 0xFD, 0xC0 | (13 - 1)]);
    assert!(runs.iter().all(|&b| b < 0xFE));
}

#[test]
fn body_never_ends_with_seven_zero_bytes() {
    // streams heavy in INDEX-0 chunks must not fake the end marker
    let mut pixels = Vec::new();
    for _ in 0..40 {
        pixels.extend_from_slice(&[0, 0, 0, 0]);
        pixels.extend_from_slice(&[9, 9, 9, 255]);
    }
    let encoded = encode(header(80, 1, Channels::Rgba), &pixels);
    let body = body_of(&encoded);
    assert!(!body.windows(7).any(|w| w == [0; 7]));
}

#[test]
fn encode_rejects_bad_arguments() {
    let mut w = Vec::new();
    assert!(matches!(
        QoihEncodeContext::encode_to_vec(header(0, 5, Channels::Rgb), &[], &mut w),
        Err(EncodeError::EmptyImage)
    ));
    assert!(matches!(
        QoihEncodeContext::encode_to_vec(header(25_000, 16_000, Channels::Rgb), &[], &mut w),
        Err(EncodeError::TooLarge { .. })
    ));
    assert!(matches!(
        QoihEncodeContext::encode_to_vec(header(2, 2, Channels::Rgb), &[0; 11], &mut w),
        Err(EncodeError::InvalidDimensions { .. })
    ));
    assert!(w.is_empty());
}

#[test]
fn decode_validates_the_header() {
    let encoded = encode(header(2, 2, Channels::Rgb), &[8; 12]);
    let mut w = Vec::new();

    let mut bad_magic = encoded.clone();
    bad_magic[0] = b'x';
    assert!(matches!(
        QoihDecodeContext::decode_to_vec(&bad_magic, None, &mut w),
        Err(DecodeError::InvalidMagic)
    ));

    let mut zero_width = encoded.clone();
    zero_width[4..8].copy_from_slice(&0u32.to_be_bytes());
    assert!(matches!(
        decode_header(&zero_width),
        Err(DecodeError::InvalidDimensions { .. })
    ));

    let mut too_large = encoded.clone();
    too_large[4..8].copy_from_slice(&25_000u32.to_be_bytes());
    too_large[8..12].copy_from_slice(&16_000u32.to_be_bytes());
    assert!(matches!(
        decode_header(&too_large),
        Err(DecodeError::InvalidDimensions { .. })
    ));

    let mut bad_channels = encoded.clone();
    bad_channels[12] = 5;
    assert!(matches!(
        decode_header(&bad_channels),
        Err(DecodeError::InvalidChannels { channels: 5 })
    ));

    let mut bad_colorspace = encoded.clone();
    bad_colorspace[13] = 2;
    assert!(matches!(
        decode_header(&bad_colorspace),
        Err(DecodeError::InvalidColorspace { colorspace: 2 })
    ));

    assert!(matches!(
        decode_header(&encoded[..10]),
        Err(DecodeError::UnexpectedEof)
    ));
}

#[test]
fn decode_header_reads_the_description() {
    let desc = Header {
        width: 7,
        height: 3,
        channels: Channels::Rgba,
        colorspace: Colorspace::Linear,
    };
    let encoded = encode(desc, &[1; 7 * 3 * 4]);
    assert_eq!(decode_header(&encoded).unwrap(), desc);
}

#[test]
fn truncated_body_fills_with_the_last_pixel() {
    let pixels: Vec<u8> = (0..8u8).flat_map(|i| [i * 20, i * 20, i * 20]).collect();
    let encoded = encode(header(8, 1, Channels::Rgb), &pixels);

    // drop the last chunk but keep the end marker length intact
    let truncated = &encoded[..encoded.len() - 4];

    let mut decoded = Vec::new();
    let parsed = QoihDecodeContext::decode_to_vec(truncated, None, &mut decoded).unwrap();
    assert_eq!(parsed.pixel_count(), 8);
    assert_eq!(decoded.len(), 8 * 3);
    // whatever was recovered, the tail repeats the last decoded pixel
    let last = &decoded[decoded.len() - 3..];
    assert_eq!(&decoded[decoded.len() - 6..decoded.len() - 3], last);

    let mut strict = Vec::new();
    assert!(matches!(
        QoihDecodeContext::decode_to_vec_strict(truncated, None, &mut strict),
        Err(DecodeError::TruncatedBody)
    ));
}

#[test]
fn colorspace_survives_the_entropy_flag() {
    let desc = Header {
        width: 1,
        height: 1,
        channels: Channels::Rgb,
        colorspace: Colorspace::Linear,
    };
    let mut encoded = encode(desc, &[0, 0, 0]);
    assert_eq!(encoded[13], 1);

    // set the entropy bit by hand: the header must still parse as linear,
    // even though the body is not actually entropy coded
    encoded[13] |= 0x80;
    let parsed = decode_header(&encoded).unwrap();
    assert_eq!(parsed.colorspace, Colorspace::Linear);
}
