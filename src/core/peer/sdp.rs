//! SDP rewriting for the answer sent to the browser.
//!
//! The audio section is narrowed to Opus alone and its `fmtp` line replaced
//! with mono, in-band FEC and a capped average bitrate.

use tracing::warn;

const OPUS_RTPMAP: &str = "opus/48000";

/// Opus `fmtp` parameters for `bitrate` bits per second.
pub fn opus_fmtp(bitrate: u32) -> String {
    format!("minptime=10;useinbandfec=1;stereo=0;sprop-stereo=0;maxaveragebitrate={bitrate}")
}

/// Rewrite every audio media section of `sdp` to carry only Opus.
/// Sections without Opus are left untouched.
pub fn pin_opus(sdp: &str, bitrate: u32) -> String {
    let lines: Vec<&str> = sdp.lines().map(|l| l.trim_end_matches('\r')).collect();

    let mut out: Vec<String> = Vec::with_capacity(lines.len());
    let mut start = 0;
    while start < lines.len() {
        let end = lines[start + 1..]
            .iter()
            .position(|l| l.starts_with("m="))
            .map(|offset| start + 1 + offset)
            .unwrap_or(lines.len());

        let section = &lines[start..end];
        if section[0].starts_with("m=audio") {
            out.extend(rewrite_audio_section(section, bitrate));
        } else {
            out.extend(section.iter().map(|l| l.to_string()));
        }
        start = end;
    }

    let mut result = out.join("\r\n");
    result.push_str("\r\n");
    result
}

fn rewrite_audio_section(section: &[&str], bitrate: u32) -> Vec<String> {
    let Some(opus_pt) = section.iter().find_map(|line| {
        let rest = line.strip_prefix("a=rtpmap:")?;
        let (pt, codec) = rest.split_once(' ')?;
        codec
            .to_ascii_lowercase()
            .starts_with(OPUS_RTPMAP)
            .then(|| pt.to_string())
    }) else {
        warn!("audio section has no Opus payload, leaving it unchanged");
        return section.iter().map(|l| l.to_string()).collect();
    };

    let mut out = Vec::with_capacity(section.len());
    let mut wrote_fmtp = false;

    for (index, line) in section.iter().enumerate() {
        if index == 0 {
            // m=audio <port> <proto> <fmt list>
            let fields: Vec<&str> = line.split(' ').collect();
            if fields.len() >= 4 {
                out.push(format!("{} {}", fields[..3].join(" "), opus_pt));
            } else {
                out.push(line.to_string());
            }
            continue;
        }

        match payload_attribute(line) {
            Some(("rtpmap", pt)) if pt == opus_pt => {
                out.push(line.to_string());
            }
            Some(("fmtp", pt)) if pt == opus_pt => {
                out.push(format!("a=fmtp:{} {}", opus_pt, opus_fmtp(bitrate)));
                wrote_fmtp = true;
            }
            Some(("rtcp-fb", pt)) if pt == opus_pt || pt == "*" => {
                out.push(line.to_string());
            }
            Some(_) => {}
            None => out.push(line.to_string()),
        }
    }

    if !wrote_fmtp {
        let position = out
            .iter()
            .position(|l| l.starts_with(&format!("a=rtpmap:{opus_pt} ")))
            .map(|p| p + 1)
            .unwrap_or(out.len());
        out.insert(position, format!("a=fmtp:{} {}", opus_pt, opus_fmtp(bitrate)));
    }

    out
}

/// `(attribute, payload type)` for per-payload attributes.
fn payload_attribute(line: &str) -> Option<(&'static str, &str)> {
    for attribute in ["rtpmap", "fmtp", "rtcp-fb"] {
        let prefix = format!("a={attribute}:");
        if let Some(rest) = line.strip_prefix(prefix.as_str()) {
            let pt = rest.split(' ').next().unwrap_or_default();
            return Some((attribute, pt));
        }
    }
    None
}
