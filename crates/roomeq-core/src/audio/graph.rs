//! Render graph: source → filter chain → output
//!
//! The graph is shared between the engine thread (which mutates it) and the
//! output clock (which pulls samples from it). All topology changes go
//! through [`RenderGraph::rebuild`] or [`RenderGraph::reconnect_chain`] while
//! the caller holds the graph lock, so the clock never observes a
//! half-connected graph.

use crate::audio::decoder::DecodedAudio;
use crate::audio::filters::FilterChain;
use crate::error::{Error, Result};
use std::sync::{Arc, Mutex};

/// Graph shared with the output callback
pub type SharedGraph = Arc<Mutex<RenderGraph>>;

/// Cursor over decoded audio, created fresh on every (re)start
pub struct SourceNode {
    audio: Arc<DecodedAudio>,
    cursor: usize,
}

impl SourceNode {
    /// Source starting at `start_frame`
    pub fn new(audio: Arc<DecodedAudio>, start_frame: usize) -> Self {
        let cursor = start_frame.min(audio.frames());
        Self { audio, cursor }
    }

    /// Next frame to be rendered
    pub fn position_frames(&self) -> usize {
        self.cursor
    }

    pub fn is_finished(&self) -> bool {
        self.cursor >= self.audio.frames()
    }
}

/// The live audio graph
pub struct RenderGraph {
    source: Option<SourceNode>,
    chain: FilterChain,
    output_channels: usize,
    suspended: bool,
    /// Scratch frame in source channel layout, sized on rebuild
    scratch: Vec<f32>,
}

impl RenderGraph {
    pub fn new(output_channels: usize) -> Self {
        Self {
            source: None,
            chain: FilterChain::empty(),
            output_channels: output_channels.max(1),
            suspended: true,
            scratch: Vec::new(),
        }
    }

    /// Create a graph wrapped for sharing with an output
    pub fn shared(output_channels: usize) -> SharedGraph {
        Arc::new(Mutex::new(Self::new(output_channels)))
    }

    /// Tear down the current source and chain and install new ones
    ///
    /// The suspension state is left untouched: rebuilding a suspended graph
    /// yields a suspended graph.
    pub fn rebuild(&mut self, source: Option<SourceNode>, chain: FilterChain) {
        let channels = source.as_ref().map(|s| s.audio.channels()).unwrap_or(0);
        self.scratch.clear();
        self.scratch.resize(channels, 0.0);
        self.source = source;
        self.chain = chain;
    }

    /// Swap the filter chain of a running graph, keeping the source
    ///
    /// Fails while the clock is suspended, where the source has to be
    /// rebuilt instead.
    pub fn reconnect_chain(&mut self, chain: FilterChain) -> Result<()> {
        if self.suspended {
            return Err(Error::InvalidState {
                operation: "reconnect filter chain",
                state: "suspended".to_string(),
            });
        }
        self.chain = chain;
        Ok(())
    }

    pub fn set_suspended(&mut self, suspended: bool) {
        self.suspended = suspended;
    }

    pub fn is_suspended(&self) -> bool {
        self.suspended
    }

    pub fn output_channels(&self) -> usize {
        self.output_channels
    }

    /// Number of bands in the connected chain
    pub fn chain_len(&self) -> usize {
        self.chain.len()
    }

    /// Current source position, `None` without a source
    pub fn position_frames(&self) -> Option<usize> {
        self.source.as_ref().map(SourceNode::position_frames)
    }

    /// Whether the source has played to its end
    pub fn is_finished(&self) -> bool {
        self.source.as_ref().map(SourceNode::is_finished).unwrap_or(false)
    }

    /// Render one interleaved output buffer
    ///
    /// Produces silence (without advancing) while suspended or without a
    /// source. Mono sources are copied to every output channel; otherwise
    /// source channel `i` goes to output channel `i` and extra output
    /// channels are silent.
    pub fn render(&mut self, out: &mut [f32]) {
        let out_channels = self.output_channels;
        let Some(source) = self.source.as_mut().filter(|_| !self.suspended) else {
            out.fill(0.0);
            return;
        };

        let src_channels = source.audio.channels();
        for out_frame in out.chunks_mut(out_channels) {
            match source.audio.frame(source.cursor) {
                Some(frame) => {
                    self.scratch.copy_from_slice(frame);
                    self.chain.process_frame(&mut self.scratch);
                    source.cursor += 1;

                    if src_channels == 1 {
                        out_frame.fill(self.scratch[0]);
                    } else {
                        for (ch, sample) in out_frame.iter_mut().enumerate() {
                            *sample = self.scratch.get(ch).copied().unwrap_or(0.0);
                        }
                    }
                }
                None => out_frame.fill(0.0),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::filters::FilterParam;

    fn ramp(frames: usize, channels: usize) -> Arc<DecodedAudio> {
        let samples = (0..frames * channels).map(|i| i as f32).collect();
        Arc::new(DecodedAudio::from_interleaved(samples, 48000, channels))
    }

    #[test]
    fn test_suspended_graph_is_silent_and_still() {
        let mut graph = RenderGraph::new(2);
        graph.rebuild(Some(SourceNode::new(ramp(10, 1), 0)), FilterChain::empty());
        let mut out = vec![1.0f32; 8];
        graph.render(&mut out);
        assert!(out.iter().all(|&s| s == 0.0));
        assert_eq!(graph.position_frames(), Some(0));
    }

    #[test]
    fn test_mono_source_fans_out() {
        let mut graph = RenderGraph::new(2);
        graph.rebuild(Some(SourceNode::new(ramp(4, 1), 1)), FilterChain::empty());
        graph.set_suspended(false);
        let mut out = vec![0.0f32; 4];
        graph.render(&mut out);
        assert_eq!(out, vec![1.0, 1.0, 2.0, 2.0]);
        assert_eq!(graph.position_frames(), Some(3));
    }

    #[test]
    fn test_end_of_source_pads_silence() {
        let mut graph = RenderGraph::new(1);
        graph.rebuild(Some(SourceNode::new(ramp(2, 1), 0)), FilterChain::empty());
        graph.set_suspended(false);
        let mut out = vec![9.0f32; 4];
        graph.render(&mut out);
        assert_eq!(out, vec![0.0, 1.0, 0.0, 0.0]);
        assert!(graph.is_finished());
    }

    #[test]
    fn test_reconnect_refused_while_suspended() {
        let mut graph = RenderGraph::new(1);
        let chain =
            FilterChain::build(&[FilterParam::peaking(1000.0, 1.0, 3.0)], 48000, 1).unwrap();
        assert!(graph.reconnect_chain(chain).is_err());

        graph.set_suspended(false);
        let chain =
            FilterChain::build(&[FilterParam::peaking(1000.0, 1.0, 3.0)], 48000, 1).unwrap();
        graph.reconnect_chain(chain).unwrap();
        assert_eq!(graph.chain_len(), 1);
    }
}
