#![allow(dead_code)]

use anyhow::{Result, anyhow};
use lectern::{
    http::{Identity, Response, Transport},
    reqwest::{StatusCode, Url, header::HeaderMap},
    tool::{Invocation, Tool, ToolOutput, ToolRunner},
};
use std::{
    cell::RefCell,
    collections::{HashMap, VecDeque},
    fs,
    path::{Path, PathBuf},
};

pub const VIDEO_KID: &str = "aa110000000000000000000000000000";
pub const AUDIO_KID: &str = "bb220000000000000000000000000000";
pub const VIDEO_KEY: &str = "0123456789abcdef0123456789abcdef";
pub const AUDIO_KEY: &str = "fedcba9876543210fedcba9876543210";

fn mp4_box(name: &[u8; 4], payload: &[u8]) -> Vec<u8> {
    let mut data = ((payload.len() + 8) as u32).to_be_bytes().to_vec();
    data.extend_from_slice(name);
    data.extend_from_slice(payload);
    data
}

fn sinf(kid: &str) -> Vec<u8> {
    let mut tenc = vec![0, 0, 0, 0, 0, 0, 1, 8];
    tenc.extend(hex::decode(kid).unwrap());

    let mut payload = mp4_box(b"frma", b"avc1");
    payload.extend(mp4_box(b"schi", &mp4_box(b"tenc", &tenc)));
    mp4_box(b"sinf", &payload)
}

fn init_segment(entry: Vec<u8>) -> Vec<u8> {
    let mut stsd = vec![0, 0, 0, 0, 0, 0, 0, 1];
    stsd.extend(entry);

    let trak = mp4_box(
        b"trak",
        &mp4_box(
            b"mdia",
            &mp4_box(b"minf", &mp4_box(b"stbl", &mp4_box(b"stsd", &stsd))),
        ),
    );

    let mut data = mp4_box(b"ftyp", b"isom\0\0\0\0isomiso6");
    data.extend(mp4_box(b"moov", &trak));
    data.extend(mp4_box(b"mdat", &[0; 64]));
    data
}

pub fn encrypted_video(kid: &str) -> Vec<u8> {
    let mut encv = vec![0; 78];
    encv.extend(sinf(kid));
    init_segment(mp4_box(b"encv", &encv))
}

pub fn encrypted_audio(kid: &str) -> Vec<u8> {
    let mut enca = vec![0; 28];
    enca.extend(sinf(kid));
    init_segment(mp4_box(b"enca", &enca))
}

/// Records invocations and imitates the files each tool would produce.
pub struct FakeRunner {
    calls: RefCell<Vec<Invocation>>,
    exit_codes: RefCell<HashMap<&'static str, VecDeque<i32>>>,
    pub video_kid: String,
    pub audio_kid: String,
    /// Complete stdout returned to `yt-dlp -J`.
    pub probe_json: String,
}

impl Default for FakeRunner {
    fn default() -> Self {
        Self {
            calls: RefCell::new(Vec::new()),
            exit_codes: RefCell::new(HashMap::new()),
            video_kid: VIDEO_KID.to_owned(),
            audio_kid: AUDIO_KID.to_owned(),
            probe_json: String::new(),
        }
    }
}

impl FakeRunner {
    pub fn with_probe_json(probe_json: impl Into<String>) -> Self {
        Self {
            probe_json: probe_json.into(),
            ..Default::default()
        }
    }

    /// Queue exit codes for the next invocations of `tool`, later calls succeed.
    pub fn exit_codes(&self, tool: Tool, codes: &[i32]) {
        self.exit_codes
            .borrow_mut()
            .entry(tool.binary())
            .or_default()
            .extend(codes);
    }

    pub fn calls(&self) -> Vec<Invocation> {
        self.calls.borrow().clone()
    }

    pub fn calls_of(&self, tool: Tool) -> Vec<Invocation> {
        self.calls
            .borrow()
            .iter()
            .filter(|x| x.tool == tool)
            .cloned()
            .collect()
    }

    fn produce(&self, invocation: &Invocation) -> Result<()> {
        let cwd = invocation.cwd.clone().unwrap_or_else(|| PathBuf::from("."));

        match invocation.tool {
            Tool::YtDlp => {
                if invocation.has_arg("-J") {
                    return Ok(());
                }

                let template = invocation
                    .arg_value("-o")
                    .ok_or_else(|| anyhow!("yt-dlp without -o"))?;

                if invocation.has_arg("-f") {
                    fs::write(
                        cwd.join(template.replace("%(ext)s", "mp4")),
                        encrypted_video(&self.video_kid),
                    )?;
                    fs::write(
                        cwd.join(template.replace("%(ext)s", "m4a")),
                        encrypted_audio(&self.audio_kid),
                    )?;
                } else {
                    fs::write(cwd.join(template.replace("%(ext)s", "mp4")), b"hls video")?;
                }
            }
            Tool::ShakaPackager => {
                for descriptor in invocation.args.iter().filter(|x| x.starts_with("in=")) {
                    let output = descriptor
                        .split(',')
                        .find_map(|x| x.strip_prefix("output="))
                        .ok_or_else(|| anyhow!("descriptor without output"))?;
                    fs::write(cwd.join(output), b"decrypted")?;
                }
            }
            Tool::Ffmpeg => {
                let output = invocation
                    .args
                    .last()
                    .ok_or_else(|| anyhow!("ffmpeg without output"))?;
                fs::write(cwd.join(output), b"merged")?;
            }
            Tool::Aria2c => {
                let dir = invocation.arg_value("-d").unwrap_or(".");
                let name = invocation
                    .arg_value("-o")
                    .ok_or_else(|| anyhow!("aria2c without -o"))?;
                fs::write(Path::new(dir).join(name), b"progressive video")?;
            }
        }

        Ok(())
    }
}

impl ToolRunner for FakeRunner {
    fn run(&self, invocation: &Invocation) -> Result<ToolOutput> {
        self.calls.borrow_mut().push(invocation.clone());

        let exit_code = self
            .exit_codes
            .borrow_mut()
            .get_mut(invocation.tool.binary())
            .and_then(|x| x.pop_front())
            .unwrap_or(0);

        if exit_code == 0 {
            self.produce(invocation)?;
        }

        Ok(ToolOutput {
            exit_code,
            stdout: if invocation.has_arg("-J") {
                self.probe_json.clone()
            } else {
                String::new()
            },
            stdout_tail: String::new(),
            stderr_tail: if exit_code == 0 {
                String::new()
            } else {
                format!("ERROR: {} failed", invocation.tool)
            },
        })
    }
}

type Route = Box<dyn Fn(Identity) -> (u16, Vec<u8>)>;

/// Serves canned bodies per url, anything unknown is a 404.
#[derive(Default)]
pub struct FakeTransport {
    routes: HashMap<String, Route>,
    calls: RefCell<Vec<(String, Identity)>>,
}

impl FakeTransport {
    pub fn route(mut self, url: &str, status: u16, body: impl Into<Vec<u8>>) -> Self {
        let body = body.into();
        self.routes
            .insert(url.to_owned(), Box::new(move |_| (status, body.clone())));
        self
    }

    pub fn route_with(
        mut self,
        url: &str,
        handler: impl Fn(Identity) -> (u16, Vec<u8>) + 'static,
    ) -> Self {
        self.routes.insert(url.to_owned(), Box::new(handler));
        self
    }
}

/// Shared handle so tests can inspect calls after the session took ownership.
#[derive(Clone)]
pub struct SharedTransport(pub std::rc::Rc<FakeTransport>);

impl SharedTransport {
    pub fn new(transport: FakeTransport) -> Self {
        Self(std::rc::Rc::new(transport))
    }

    pub fn calls(&self) -> Vec<(String, Identity)> {
        self.0.calls.borrow().clone()
    }
}

impl Transport for SharedTransport {
    fn get(&self, url: &Url, identity: Identity, _: HeaderMap) -> Result<Response> {
        self.0
            .calls
            .borrow_mut()
            .push((url.to_string(), identity));

        let (status, body) = match self.0.routes.get(url.as_str()) {
            Some(route) => route(identity),
            None => (404, Vec::new()),
        };

        Ok(Response::new(
            StatusCode::from_u16(status)?,
            url.clone(),
            body,
        ))
    }
}
