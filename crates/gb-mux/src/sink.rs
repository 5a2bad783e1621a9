//! The RTMP publish target: an external collaborator the bridge writes
//! muxed tags to. The RTMP wire protocol itself lives outside this
//! crate; `gb-server` supplies a concrete `RtmpSink` (`rtmp_sink`) and
//! connects it once a session's device-id is known.

use async_trait::async_trait;

use crate::error::Result;
use crate::flv::FlvTag;

#[async_trait]
pub trait RtmpSink: Send {
    async fn connect(&mut self, url: &str) -> Result<()>;
    async fn publish(&mut self, tag: &FlvTag) -> Result<()>;
    async fn close(&mut self);
}

/// A sink that drops everything it's handed; used by tests and by a
/// session whose output URL could not be resolved at invite time.
#[derive(Default)]
pub struct NullSink;

#[async_trait]
impl RtmpSink for NullSink {
    async fn connect(&mut self, _url: &str) -> Result<()> {
        Ok(())
    }

    async fn publish(&mut self, _tag: &FlvTag) -> Result<()> {
        Ok(())
    }

    async fn close(&mut self) {}
}

#[async_trait]
impl RtmpSink for Box<dyn RtmpSink> {
    async fn connect(&mut self, url: &str) -> Result<()> {
        (**self).connect(url).await
    }

    async fn publish(&mut self, tag: &FlvTag) -> Result<()> {
        (**self).publish(tag).await
    }

    async fn close(&mut self) {
        (**self).close().await
    }
}
