//! EngineHandle - public API of the routing engine
//!
//! Mutations are fire-and-forget and return the command's sequence number.
//! Results are observed through the published [`EngineView`]: a command is
//! complete once `runtime.last_ack` reaches its sequence number.

use parking_lot::Mutex;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, watch};

use super::commands::{EngineCommand, Envelope, GainUpdate};
use super::EngineView;
use crate::mode::Selection;
use crate::presets::PresetId;
use crate::store::GainState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("routing engine is not running")]
pub struct EngineStopped;

#[derive(Clone)]
pub struct EngineHandle {
    /// Last issued sequence number. Held across the send so that sequence
    /// order always equals channel order.
    seq: Arc<Mutex<u64>>,
    cmd_tx: mpsc::UnboundedSender<Envelope>,
    view_rx: watch::Receiver<EngineView>,
}

impl EngineHandle {
    pub(super) fn new(
        cmd_tx: mpsc::UnboundedSender<Envelope>,
        view_rx: watch::Receiver<EngineView>,
    ) -> Self {
        Self {
            seq: Arc::new(Mutex::new(0)),
            cmd_tx,
            view_rx,
        }
    }

    fn send(&self, command: EngineCommand) -> Result<u64, EngineStopped> {
        let mut seq = self.seq.lock();
        let next = *seq + 1;
        self.cmd_tx
            .send(Envelope { seq: next, command })
            .map_err(|_| EngineStopped)?;
        *seq = next;
        Ok(next)
    }

    // =========================================================================
    // Mode and sliders
    // =========================================================================

    pub fn select_mode(&self, selection: Selection) -> Result<u64, EngineStopped> {
        self.send(EngineCommand::SelectMode(selection))
    }

    pub fn set_gains(&self, update: GainUpdate) -> Result<u64, EngineStopped> {
        self.send(EngineCommand::SetGains(update))
    }

    pub fn acknowledge_mic_setup(&self) -> Result<u64, EngineStopped> {
        self.send(EngineCommand::AcknowledgeMicSetup)
    }

    // =========================================================================
    // Presets
    // =========================================================================

    pub fn create_preset(
        &self,
        name: impl Into<String>,
        snapshot: Option<GainState>,
    ) -> Result<u64, EngineStopped> {
        self.send(EngineCommand::CreatePreset {
            name: name.into(),
            snapshot,
        })
    }

    pub fn apply_preset(&self, id: PresetId) -> Result<u64, EngineStopped> {
        self.send(EngineCommand::ApplyPreset(id))
    }

    pub fn rename_preset(&self, id: PresetId, name: impl Into<String>) -> Result<u64, EngineStopped> {
        self.send(EngineCommand::RenamePreset {
            id,
            name: name.into(),
        })
    }

    pub fn reorder_preset(&self, id: PresetId, position: usize) -> Result<u64, EngineStopped> {
        self.send(EngineCommand::ReorderPreset { id, position })
    }

    pub fn overwrite_preset(
        &self,
        id: PresetId,
        snapshot: Option<GainState>,
    ) -> Result<u64, EngineStopped> {
        self.send(EngineCommand::OverwritePreset { id, snapshot })
    }

    pub fn delete_preset(&self, id: PresetId) -> Result<u64, EngineStopped> {
        self.send(EngineCommand::DeletePreset(id))
    }

    // =========================================================================
    // Lifecycle and observation
    // =========================================================================

    /// Ask the engine to finish its current pass and shut down
    pub fn shutdown(&self) -> Result<u64, EngineStopped> {
        self.send(EngineCommand::Shutdown)
    }

    /// Latest published view
    pub fn view(&self) -> EngineView {
        self.view_rx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<EngineView> {
        self.view_rx.clone()
    }

    /// Wait until the engine has processed command `seq`
    pub async fn wait_for_ack(&self, seq: u64) -> Result<EngineView, EngineStopped> {
        let mut rx = self.view_rx.clone();
        let view = rx
            .wait_for(|view| view.runtime.last_ack >= seq)
            .await
            .map_err(|_| EngineStopped)?;
        Ok(view.clone())
    }

    pub fn is_closed(&self) -> bool {
        self.cmd_tx.is_closed()
    }

    /// A handle wired to bare channels instead of a running engine
    #[cfg(test)]
    pub(crate) fn detached(
        view: EngineView,
    ) -> (
        Self,
        mpsc::UnboundedReceiver<Envelope>,
        watch::Sender<EngineView>,
    ) {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (view_tx, view_rx) = watch::channel(view);
        (Self::new(cmd_tx, view_rx), cmd_rx, view_tx)
    }
}
