use argh::FromArgs;
use image::{ImageFormat, RgbImage, RgbaImage};
use qoih::{Channels, Colorspace, Header, QoihDecodeContext, QoihEncodeContext};
use std::{fs::File, io::BufReader, str::FromStr};

/// qoih cli encoder and decoder.
#[derive(FromArgs)]
struct Cli {
    #[argh(subcommand)]
    command: Command,
}

#[derive(FromArgs)]
#[argh(subcommand)]
enum Command {
    Encode(Encode),
    Decode(Decode),
}

#[derive(Debug, Clone, Copy)]
enum Format {
    Png,
    Jpg,
    Bmp,
}

impl FromStr for Format {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "png" => Ok(Format::Png),
            "jpg" | "jpeg" => Ok(Format::Jpg),
            "bmp" => Ok(Format::Bmp),
            other => Err(format!("unknown format `{other}`, expected png, jpg, or bmp")),
        }
    }
}

impl From<Format> for ImageFormat {
    fn from(format: Format) -> Self {
        match format {
            Format::Png => ImageFormat::Png,
            Format::Jpg => ImageFormat::Jpeg,
            Format::Bmp => ImageFormat::Bmp,
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let Cli { command } = argh::from_env();

    match command {
        Command::Encode(options) => encode(options),
        Command::Decode(options) => decode(options),
    }
}

/// Encodes an image as qoih.
#[derive(FromArgs)]
#[argh(subcommand, name = "encode")]
struct Encode {
    /// input format, optional (png, jpg, bmp)
    #[argh(option)]
    format: Option<Format>,

    /// mark all channels as linear instead of sRGB
    #[argh(switch)]
    linear: bool,

    /// skip the entropy layer and always write a plain frame
    #[argh(switch)]
    no_entropy: bool,

    /// the input file; a PNG, JPG, or BMP
    #[argh(positional)]
    input: String,
    /// the output file
    #[argh(positional)]
    output: String,
}

fn encode(options: Encode) -> Result<(), Box<dyn std::error::Error>> {
    let Encode {
        format,
        linear,
        no_entropy,
        input,
        output,
    } = options;

    let image = match format {
        Some(format) => image::io::Reader::with_format(
            BufReader::new(File::open(&input)?),
            ImageFormat::from(format),
        )
        .decode()?,
        None => image::io::Reader::open(input)?
            .with_guessed_format()?
            .decode()?,
    };

    let width = image.width();
    let height = image.height();
    let channels = if image.color().has_alpha() {
        Channels::Rgba
    } else {
        Channels::Rgb
    };

    println!(
        "Encoding {width}x{height} image ({} channels)",
        channels.bytes_per_pixel()
    );

    let header = Header {
        width,
        height,
        channels,
        colorspace: if linear {
            Colorspace::Linear
        } else {
            Colorspace::Srgb
        },
    };

    let raw = match channels {
        Channels::Rgb => image.into_rgb8().into_raw(),
        Channels::Rgba => image.into_rgba8().into_raw(),
    };

    let mut v = Vec::with_capacity(1024 * 1024);
    if no_entropy {
        QoihEncodeContext::encode_plain_to_vec(header, &raw, &mut v)?;
    } else {
        QoihEncodeContext::encode_to_vec(header, &raw, &mut v)?;
    }

    std::fs::write(&output, &v)?;
    println!("Written {} bytes to `{output}`", v.len());

    Ok(())
}

/// Decodes a qoih image.
#[derive(FromArgs)]
#[argh(subcommand, name = "decode")]
struct Decode {
    /// output format (png, jpg, bmp)
    #[argh(option)]
    format: Format,

    /// the input file
    #[argh(positional)]
    input: String,
    /// the output file
    #[argh(positional)]
    output: String,
}

fn decode(options: Decode) -> Result<(), Box<dyn std::error::Error>> {
    let Decode {
        format,
        input,
        output,
    } = options;

    let qoih_input = std::fs::read(&input)?;

    println!("Decoding `{input}`");

    let mut v = Vec::with_capacity(1024 * 1024);
    let header = QoihDecodeContext::decode_to_vec(&qoih_input, None, &mut v)
        .map_err(|e| format!("{e}"))?;
    let Header { width, height, .. } = header;

    match header.channels {
        Channels::Rgb => RgbImage::from_vec(width, height, v)
            .ok_or("failed to create image")?
            .save_with_format(&output, ImageFormat::from(format))?,
        Channels::Rgba => RgbaImage::from_vec(width, height, v)
            .ok_or("failed to create image")?
            .save_with_format(&output, ImageFormat::from(format))?,
    }

    println!("Written {width}x{height} image to `{output}`");

    Ok(())
}
