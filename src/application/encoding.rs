//! `Accept-Encoding` negotiation and compression of stored artifacts.

use std::io::{self, Write};

use bytes::Bytes;
use flate2::{
    Compression,
    write::{GzEncoder, ZlibEncoder},
};

use crate::domain::encoding::ContentEncoding;

use super::{context::RequestContext, negotiate::is_buggy_ie};

const BROTLI_BUFFER: usize = 4096;
const BROTLI_QUALITY: u32 = 11;
const BROTLI_WINDOW: u32 = 22;

/// Server preference among encodings the client rates equally.
const PREFERENCE: [ContentEncoding; 3] = [
    ContentEncoding::Br,
    ContentEncoding::Gzip,
    ContentEncoding::Deflate,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncodingChoice {
    pub encoding: ContentEncoding,
    /// Whether the response should carry `Vary: Accept-Encoding`.
    pub send_vary: bool,
}

/// Pick the response encoding for a request.
///
/// Encoding off yields identity without `Vary`. A forced encoding wins over the
/// request. Otherwise the highest-rated allowed coding is chosen, ties broken by
/// `br`, `gzip`, `deflate`; old Internet Explorer always gets identity and no `Vary`.
pub fn select_encoding(
    ctx: &RequestContext,
    accept_encoding: Option<&str>,
    user_agent: Option<&str>,
) -> EncodingChoice {
    if !ctx.encode {
        return EncodingChoice {
            encoding: ContentEncoding::Identity,
            send_vary: false,
        };
    }
    if let Some(forced) = ctx.forced_encoding {
        return EncodingChoice {
            encoding: forced,
            send_vary: true,
        };
    }
    if is_buggy_ie(user_agent) {
        return EncodingChoice {
            encoding: ContentEncoding::Identity,
            send_vary: false,
        };
    }
    EncodingChoice {
        encoding: accept_encoding
            .map(|header| preferred(header, &ctx.allowed_encodings))
            .unwrap_or(ContentEncoding::Identity),
        send_vary: true,
    }
}

fn preferred(header: &str, allowed: &[ContentEncoding]) -> ContentEncoding {
    let ratings = parse_accept_encoding(header);
    let rating = |coding: ContentEncoding| {
        ratings
            .iter()
            .find(|(name, _)| *name == Some(coding))
            .or_else(|| ratings.iter().find(|(name, _)| name.is_none()))
            .map_or(0.0, |(_, q)| *q)
    };

    let mut best = ContentEncoding::Identity;
    let mut best_q = 0.0_f32;
    for coding in PREFERENCE.into_iter().filter(|c| allowed.contains(c)) {
        let q = rating(coding);
        if q > best_q {
            best = coding;
            best_q = q;
        }
    }
    best
}

/// `(coding, q)` pairs; `None` stands for `*`. Unknown codings are dropped.
fn parse_accept_encoding(header: &str) -> Vec<(Option<ContentEncoding>, f32)> {
    header
        .split(',')
        .filter_map(|item| {
            let mut parts = item.split(';');
            let name = parts.next()?.trim();
            let q = parts
                .filter_map(|param| param.trim().strip_prefix("q="))
                .find_map(|value| value.trim().parse::<f32>().ok())
                .unwrap_or(1.0);
            if name == "*" {
                return Some((None, q));
            }
            match name.parse::<ContentEncoding>() {
                Ok(coding) if !coding.is_identity() => Some((Some(coding), q)),
                _ => None,
            }
        })
        .collect()
}

/// Compress `content` with `encoding`; identity copies.
///
/// `level` applies to gzip and deflate (0 to 9); brotli always runs at its best
/// quality since variants are built once and cached.
pub fn encode(content: &[u8], encoding: ContentEncoding, level: u32) -> io::Result<Bytes> {
    let level = Compression::new(level.min(9));
    let encoded = match encoding {
        ContentEncoding::Identity => return Ok(Bytes::copy_from_slice(content)),
        ContentEncoding::Gzip => {
            let mut encoder = GzEncoder::new(Vec::new(), level);
            encoder.write_all(content)?;
            encoder.finish()?
        }
        ContentEncoding::Deflate => {
            let mut encoder = ZlibEncoder::new(Vec::new(), level);
            encoder.write_all(content)?;
            encoder.finish()?
        }
        ContentEncoding::Br => {
            let mut out = Vec::new();
            {
                let mut encoder = brotli::CompressorWriter::new(
                    &mut out,
                    BROTLI_BUFFER,
                    BROTLI_QUALITY,
                    BROTLI_WINDOW,
                );
                encoder.write_all(content)?;
                encoder.flush()?;
            }
            out
        }
    };
    Ok(Bytes::from(encoded))
}

/// Non-identity encodings worth precomputing for `ctx`.
pub fn variants(ctx: &RequestContext) -> Vec<ContentEncoding> {
    if !ctx.encode {
        return Vec::new();
    }
    let mut variants: Vec<ContentEncoding> = ctx
        .allowed_encodings
        .iter()
        .copied()
        .filter(|coding| !coding.is_identity())
        .collect();
    if let Some(forced) = ctx.forced_encoding.filter(|coding| !coding.is_identity())
        && !variants.contains(&forced)
    {
        variants.push(forced);
    }
    variants
}

#[cfg(test)]
mod tests {
    use std::io::Read;

    use flate2::read::{GzDecoder, ZlibDecoder};

    use super::*;
    use crate::domain::content_type::ContentType;

    fn ctx() -> RequestContext {
        RequestContext::new(ContentType::Js)
    }

    fn choose(header: &str) -> ContentEncoding {
        select_encoding(&ctx(), Some(header), Some("curl/8")).encoding
    }

    #[test]
    fn prefers_brotli_then_gzip_then_deflate() {
        assert_eq!(choose("gzip, deflate, br"), ContentEncoding::Br);
        assert_eq!(choose("deflate, gzip"), ContentEncoding::Gzip);
        assert_eq!(choose("deflate"), ContentEncoding::Deflate);
        assert_eq!(choose("x-gzip"), ContentEncoding::Gzip);
        assert_eq!(choose("compress"), ContentEncoding::Identity);
    }

    #[test]
    fn honours_q_values() {
        assert_eq!(choose("br;q=0.5, gzip"), ContentEncoding::Gzip);
        assert_eq!(choose("br;q=0, gzip;q=0"), ContentEncoding::Identity);
        assert_eq!(choose("*;q=0.3, br;q=0"), ContentEncoding::Gzip);
        assert_eq!(choose("*"), ContentEncoding::Br);
    }

    #[test]
    fn respects_allowed_set_and_overrides() {
        let mut gzip_only = ctx();
        gzip_only.allowed_encodings = vec![ContentEncoding::Gzip];
        let choice = select_encoding(&gzip_only, Some("br, gzip"), None);
        assert_eq!(choice.encoding, ContentEncoding::Gzip);
        assert!(choice.send_vary);

        let mut forced = ctx();
        forced.forced_encoding = Some(ContentEncoding::Deflate);
        assert_eq!(
            select_encoding(&forced, Some("br"), None).encoding,
            ContentEncoding::Deflate
        );
        assert_eq!(variants(&gzip_only), vec![ContentEncoding::Gzip]);

        let mut off = ctx();
        off.encode = false;
        let choice = select_encoding(&off, Some("gzip"), None);
        assert_eq!(choice.encoding, ContentEncoding::Identity);
        assert!(!choice.send_vary);
        assert!(variants(&off).is_empty());
    }

    #[test]
    fn old_internet_explorer_gets_identity_without_vary() {
        let choice = select_encoding(
            &ctx(),
            Some("gzip, deflate"),
            Some("Mozilla/4.0 (compatible; MSIE 6.0; Windows NT 5.0)"),
        );
        assert_eq!(choice.encoding, ContentEncoding::Identity);
        assert!(!choice.send_vary);
    }

    #[test]
    fn compressed_variants_decode_to_the_input() {
        let input = "function hello(){return \"world\"}\n".repeat(64);

        let gz = encode(input.as_bytes(), ContentEncoding::Gzip, 9).expect("gzip");
        let mut out = String::new();
        GzDecoder::new(gz.as_ref()).read_to_string(&mut out).expect("gunzip");
        assert_eq!(out, input);

        let deflated = encode(input.as_bytes(), ContentEncoding::Deflate, 6).expect("deflate");
        let mut out = String::new();
        ZlibDecoder::new(deflated.as_ref())
            .read_to_string(&mut out)
            .expect("inflate");
        assert_eq!(out, input);

        let br = encode(input.as_bytes(), ContentEncoding::Br, 9).expect("brotli");
        let mut out = String::new();
        brotli::Decompressor::new(br.as_ref(), BROTLI_BUFFER)
            .read_to_string(&mut out)
            .expect("unbrotli");
        assert_eq!(out, input);
        assert!(br.len() < input.len());

        let identity = encode(input.as_bytes(), ContentEncoding::Identity, 9).expect("identity");
        assert_eq!(identity.as_ref(), input.as_bytes());
    }
}
