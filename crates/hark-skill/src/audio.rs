//! Client for the audio playback service on the bus.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use hark_protocol::{Data, Message, SkillResult, Transport};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::instrument;

use crate::resources::file_uri;

const TRACK_INFO_TIMEOUT: Duration = Duration::from_secs(1);
const LIST_BACKENDS_TIMEOUT: Duration = Duration::from_secs(3);

pub mod topics {
    pub const QUEUE: &str = "audio.service.queue";
    pub const PLAY: &str = "audio.service.play";
    pub const STOP: &str = "audio.service.stop";
    pub const NEXT: &str = "audio.service.next";
    pub const PREV: &str = "audio.service.prev";
    pub const PAUSE: &str = "audio.service.pause";
    pub const RESUME: &str = "audio.service.resume";
    pub const SEEK_FORWARD: &str = "audio.service.seek_forward";
    pub const SEEK_BACKWARD: &str = "audio.service.seek_backward";
    pub const TRACK_INFO: &str = "audio.service.track_info";
    pub const TRACK_INFO_REPLY: &str = "audio.service.track_info_reply";
    pub const LIST_BACKENDS: &str = "audio.service.list_backends";
}

/// A playable track: a URI, or a URI with a mime type hint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Track {
    Uri(String),
    WithMime(String, String),
}

impl Track {
    pub fn uri(&self) -> &str {
        match self {
            Self::Uri(uri) | Self::WithMime(uri, _) => uri,
        }
    }
}

impl From<&str> for Track {
    fn from(uri: &str) -> Self {
        Self::Uri(uri.to_owned())
    }
}

impl From<String> for Track {
    fn from(uri: String) -> Self {
        Self::Uri(uri)
    }
}

impl From<(&str, &str)> for Track {
    fn from((uri, mime): (&str, &str)) -> Self {
        Self::WithMime(uri.to_owned(), mime.to_owned())
    }
}

/// Turn a bare path into an absolute `file://` URI; URIs pass through.
pub fn ensure_uri(track: Track) -> Track {
    fn fix(uri: String) -> String {
        if uri.contains("://") {
            uri
        } else {
            file_uri(Path::new(&uri))
        }
    }
    match track {
        Track::Uri(uri) => Track::Uri(fix(uri)),
        Track::WithMime(uri, mime) => Track::WithMime(fix(uri), mime),
    }
}

#[derive(Clone)]
pub struct AudioService {
    transport: Arc<dyn Transport>,
}

impl AudioService {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    fn tracks_value<I, T>(tracks: I) -> Value
    where
        I: IntoIterator<Item = T>,
        T: Into<Track>,
    {
        let tracks: Vec<Track> = tracks
            .into_iter()
            .map(|t| ensure_uri(t.into()))
            .collect();
        json!(tracks)
    }

    async fn emit_bare(&self, topic: &str) -> SkillResult<()> {
        self.transport.emit(Message::bare(topic)).await
    }

    pub async fn queue<I, T>(&self, tracks: I) -> SkillResult<()>
    where
        I: IntoIterator<Item = T>,
        T: Into<Track>,
    {
        let data = json!({ "tracks": Self::tracks_value(tracks) });
        self.transport
            .emit(Message::from_value(topics::QUEUE, data))
            .await
    }

    #[instrument(skip(self, tracks, utterance))]
    pub async fn play<I, T>(
        &self,
        tracks: I,
        utterance: Option<&str>,
        repeat: bool,
    ) -> SkillResult<()>
    where
        I: IntoIterator<Item = T>,
        T: Into<Track>,
    {
        let data = json!({
            "tracks": Self::tracks_value(tracks),
            "utterance": utterance.unwrap_or_default(),
            "repeat": repeat,
        });
        self.transport
            .emit(Message::from_value(topics::PLAY, data))
            .await
    }

    pub async fn stop(&self) -> SkillResult<()> {
        self.emit_bare(topics::STOP).await
    }

    pub async fn next(&self) -> SkillResult<()> {
        self.emit_bare(topics::NEXT).await
    }

    pub async fn prev(&self) -> SkillResult<()> {
        self.emit_bare(topics::PREV).await
    }

    pub async fn pause(&self) -> SkillResult<()> {
        self.emit_bare(topics::PAUSE).await
    }

    pub async fn resume(&self) -> SkillResult<()> {
        self.emit_bare(topics::RESUME).await
    }

    /// Seek relative to the current position; negative rewinds.
    pub async fn seek(&self, seconds: i64) -> SkillResult<()> {
        if seconds < 0 {
            self.seek_backward(seconds.unsigned_abs()).await
        } else {
            self.seek_forward(seconds.unsigned_abs()).await
        }
    }

    pub async fn seek_forward(&self, seconds: u64) -> SkillResult<()> {
        self.transport
            .emit(Message::from_value(
                topics::SEEK_FORWARD,
                json!({ "seconds": seconds }),
            ))
            .await
    }

    pub async fn seek_backward(&self, seconds: u64) -> SkillResult<()> {
        self.transport
            .emit(Message::from_value(
                topics::SEEK_BACKWARD,
                json!({ "seconds": seconds }),
            ))
            .await
    }

    /// Info about the current track; empty when nothing answers.
    pub async fn track_info(&self) -> SkillResult<Data> {
        let reply = self
            .transport
            .wait_for_response(
                Message::bare(topics::TRACK_INFO),
                Some(topics::TRACK_INFO_REPLY),
                TRACK_INFO_TIMEOUT,
            )
            .await?;
        Ok(reply.map(|m| m.data).unwrap_or_default())
    }

    pub async fn available_backends(&self) -> SkillResult<Data> {
        let reply = self
            .transport
            .wait_for_response(
                Message::bare(topics::LIST_BACKENDS),
                None,
                LIST_BACKENDS_TIMEOUT,
            )
            .await?;
        Ok(reply.map(|m| m.data).unwrap_or_default())
    }

    pub async fn is_playing(&self) -> SkillResult<bool> {
        Ok(!self.track_info().await?.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use hark_bus::{MessageBus, handler_fn};

    #[test]
    fn bare_paths_become_file_uris() {
        let Track::Uri(uri) = ensure_uri("/music/song.mp3".into()) else {
            panic!("expected plain uri");
        };
        assert_eq!(uri, "file:///music/song.mp3");

        let remote = ensure_uri(("http://radio.example/live", "audio/mpeg").into());
        assert_eq!(remote.uri(), "http://radio.example/live");
    }

    #[tokio::test]
    async fn play_emits_normalized_tracks() -> Result<()> {
        let bus = MessageBus::default();
        let mut observer = bus.subscribe();
        let audio = AudioService::new(Arc::new(bus.clone()));

        audio
            .play(
                vec![Track::from("/music/a.mp3"), Track::from(("https://x/b.ogg", "audio/ogg"))],
                Some("play my music"),
                true,
            )
            .await?;

        let message = observer.recv().await?;
        assert_eq!(message.msg_type, topics::PLAY);
        assert_eq!(
            message.data["tracks"],
            json!(["file:///music/a.mp3", ["https://x/b.ogg", "audio/ogg"]])
        );
        assert_eq!(message.data["utterance"], "play my music");
        assert_eq!(message.data["repeat"], true);
        Ok(())
    }

    #[tokio::test]
    async fn negative_seek_rewinds() -> Result<()> {
        let bus = MessageBus::default();
        let mut observer = bus.subscribe();
        let audio = AudioService::new(Arc::new(bus.clone()));

        audio.seek(-10).await?;
        let message = observer.recv().await?;
        assert_eq!(message.msg_type, topics::SEEK_BACKWARD);
        assert_eq!(message.data["seconds"], 10);
        Ok(())
    }

    #[tokio::test]
    async fn track_info_reads_reply() -> Result<()> {
        let bus = MessageBus::default();
        let replier = bus.clone();
        bus.on(
            topics::TRACK_INFO,
            handler_fn(move |message: Message| {
                let replier = replier.clone();
                async move {
                    let mut data = Data::new();
                    data.insert("title".into(), json!("Blue in Green"));
                    let _ = replier
                        .emit(message.reply(topics::TRACK_INFO_REPLY, data))
                        .await;
                }
            }),
        );

        let audio = AudioService::new(Arc::new(bus.clone()));
        let info = audio.track_info().await?;
        assert_eq!(info["title"], "Blue in Green");
        assert!(audio.is_playing().await?);
        Ok(())
    }

    #[tokio::test]
    async fn silent_service_is_not_playing() -> Result<()> {
        let audio = AudioService::new(Arc::new(MessageBus::default()));
        assert!(!audio.is_playing().await?);
        Ok(())
    }
}
