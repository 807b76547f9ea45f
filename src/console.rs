//! Configuration console: runs decoded requests against the live state.

use core::fmt::Write;

use embedded_storage::Storage;
use heapless::String;

use crate::keymap::Keymap;
use crate::now_playing::NowPlaying;
use crate::protocol::{Reply, Request};
use crate::stats::MemoryStats;
use crate::storage::ConfigStore;

pub struct Console<S, M> {
    store: ConfigStore<S>,
    memory: M,
}

impl<S, M> Console<S, M>
where
    S: Storage,
    S::Error: core::fmt::Debug,
    M: MemoryStats,
{
    pub fn new(store: ConfigStore<S>, memory: M) -> Self {
        Self { store, memory }
    }

    pub fn store_mut(&mut self) -> &mut ConfigStore<S> {
        &mut self.store
    }

    /// Handle one line from the host. Blank lines get no reply.
    ///
    /// The reply goes into `out` whole. When it does not fit, `out` is left
    /// as it was and `Err` is returned; the request itself has still run.
    pub fn handle_line<const N: usize>(
        &mut self,
        line: &[u8],
        keymap: &mut Keymap,
        now_playing: &mut NowPlaying,
        now_ms: u64,
        out: &mut String<N>,
    ) -> core::fmt::Result {
        let mark = out.len();
        self.respond(line, keymap, now_playing, now_ms, out)
            .inspect_err(|_| out.truncate(mark))
    }

    fn respond<W: Write>(
        &mut self,
        line: &[u8],
        keymap: &mut Keymap,
        now_playing: &mut NowPlaying,
        now_ms: u64,
        out: &mut W,
    ) -> core::fmt::Result {
        let Ok(text) = core::str::from_utf8(line) else {
            log::debug!("non-utf8 line, {} bytes", line.len());
            return Reply::UnknownCommand.write_to(out);
        };
        let Some(request) = Request::parse(text) else {
            return Ok(());
        };

        match request {
            Request::GetConfig => Reply::Config(keymap).write_to(out),
            Request::SetConfig(new_map) => {
                *keymap = new_map;
                if let Err(e) = self.store.save(keymap) {
                    log::warn!("config save failed: {}", e);
                    Reply::StorageFailed.write_to(out)?;
                }
                log::info!("config updated");
                Reply::Ok.write_to(out)
            }
            Request::ResetConfig => {
                if let Err(e) = self.store.invalidate() {
                    log::warn!("config invalidate failed: {}", e);
                    Reply::StorageFailed.write_to(out)?;
                }
                Reply::Erased.write_to(out)
            }
            Request::GetStats => Reply::Stats {
                ram: self.memory.ram_usage(),
                storage: self.store.usage(),
            }
            .write_to(out),
            Request::SongInfo(update) => {
                if now_playing.apply(&update, now_ms) {
                    log::debug!("now playing: {}", now_playing.title());
                }
                Reply::Ok.write_to(out)
            }
            Request::Unknown(cmd) => {
                log::debug!("unknown command: {}", cmd);
                Reply::UnknownCommand.write_to(out)
            }
        }
    }
}
