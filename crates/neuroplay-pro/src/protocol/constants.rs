//! Protocol constants for hub command names.
//!
//! The hub echoes the command name back in the `command` field of every
//! reply, so the same table is used to build requests and to recognize
//! responses. Replies are matched case-insensitively (`"BCI"` is answered
//! with `"bci"`).

/// Known NeuroplayPro hub command names.
pub struct Commands;

impl Commands {
    // ─── Handshake / settings ───────────────────────────────────────

    /// List every command the hub understands (first command after connect).
    pub const HELP: &'static str = "help";

    /// Hub version string.
    pub const VERSION: &'static str = "version";

    /// Name of the device the hub starts by default.
    pub const GET_FAVORITE_DEVICE_NAME: &'static str = "getfavoritedevicename";

    /// Mark a device as the favorite (`value` = device name).
    pub const MAKE_FAVORITE: &'static str = "makefavorite";

    /// Read the LPF/HPF/BSF filter settings.
    pub const GET_FILTERS: &'static str = "getfilters";

    /// Restore the hub's default filters (replies like `getfilters`).
    pub const SET_DEFAULT_FILTERS: &'static str = "setdefaultfilters";

    /// Set the low-pass filter cutoff.
    pub const SET_LPF: &'static str = "setLPF";

    /// Set the high-pass filter cutoff.
    pub const SET_HPF: &'static str = "setHPF";

    /// Set the band-stop (notch) filter frequency.
    pub const SET_BSF: &'static str = "setBSF";

    /// Read how many seconds of data the hub keeps.
    pub const GET_DATA_STORAGE_TIME: &'static str = "getdatastoragetime";

    /// Set how many seconds of data the hub keeps. The value must be a string.
    pub const SET_DATA_STORAGE_TIME: &'static str = "setdatastoragetime";

    // ─── Discovery / lifecycle ──────────────────────────────────────

    /// Report the device the hub is currently running.
    pub const CURRENT_DEVICE_INFO: &'static str = "currentdeviceinfo";

    /// Begin a hardware search.
    pub const START_SEARCH: &'static str = "startsearch";

    /// List devices found by the current search.
    pub const LIST_DEVICES: &'static str = "listdevices";

    /// Start a device by serial number.
    pub const START_DEVICE: &'static str = "startdevice";

    /// Stop the running device.
    pub const STOP_DEVICE: &'static str = "stopdevice";

    // ─── Grab mode ──────────────────────────────────────────────────

    pub const ENABLE_DATA_GRAB_MODE: &'static str = "enabledatagrabmode";
    pub const DISABLE_DATA_GRAB_MODE: &'static str = "disabledatagrabmode";

    /// Filtered samples accumulated since the previous grab.
    pub const GRAB_FILTERED_DATA: &'static str = "grabfiltereddata";

    /// Raw samples accumulated since the previous grab.
    pub const GRAB_RAW_DATA: &'static str = "grabrawdata";

    pub const RHYTHMS_HISTORY: &'static str = "rhythmshistory";
    pub const MEDITATION_HISTORY: &'static str = "meditationhistory";
    pub const CONCENTRATION_HISTORY: &'static str = "concentrationhistory";

    // ─── Single-shot data ───────────────────────────────────────────

    pub const SPECTRUM_FREQUENCIES: &'static str = "spectrumfrequencies";
    pub const FILTERED_DATA: &'static str = "filtereddata";
    pub const RAW_DATA: &'static str = "rawdata";
    pub const SPECTRUM: &'static str = "spectrum";

    /// Reply name used by some hub versions for `spectrum`.
    pub const LAST_SPECTRUM: &'static str = "lastspectrum";

    pub const RHYTHMS: &'static str = "rhythms";
    pub const MEDITATION: &'static str = "meditation";
    pub const CONCENTRATION: &'static str = "concentration";

    /// Meditation and concentration in one reply. Sent upper-case, answered as `bci`.
    pub const BCI: &'static str = "BCI";

    // ─── Recording ──────────────────────────────────────────────────

    pub const START_RECORD: &'static str = "startrecord";

    /// Stop recording; the reply carries the recorded files as base64.
    pub const STOP_RECORD: &'static str = "stoprecord";
}

