use bitflags::bitflags;

bitflags! {
    /// Capability flags negotiated through the authenticator checksum.
    ///
    /// The low bits are the [Checksum Flags Field](https://datatracker.ietf.org/doc/html/rfc4121#section-4.1.1.1);
    /// the high bits are the MS-KILE extensions from
    /// [3.2.5.2 Authenticator Checksum Flags](https://learn.microsoft.com/en-us/openspecs/windows_protocols/ms-kile/387806fc-ed78-445e-afd8-c5639fe4a90a).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct GssFlags: u32 {
        const DELEGATE        = 0x01;
        const MUTUAL_AUTH     = 0x02;
        const REPLAY_DETECT   = 0x04;
        const SEQUENCE_DETECT = 0x08;
        const CONFIDENTIALITY = 0x10;
        const INTEGRITY       = 0x20;

        const USE_DCE_STYLE   = 0x1000;
        const IDENTIFY        = 0x2000;
        const EXTENDED_ERROR  = 0x4000;
    }
}

impl GssFlags {
    /// The checksum flag word is transmitted little-endian.
    pub(crate) fn to_le_bytes(self) -> [u8; 4] {
        self.bits().to_le_bytes()
    }

    /// Reserved bits are dropped on decode.
    pub(crate) fn from_le_bytes(bytes: [u8; 4]) -> Self {
        Self::from_bits_truncate(u32::from_le_bytes(bytes))
    }
}

impl Default for GssFlags {
    /// Flags requested when the caller did not ask for anything explicitly.
    fn default() -> Self {
        GssFlags::SEQUENCE_DETECT | GssFlags::CONFIDENTIALITY | GssFlags::INTEGRITY
    }
}

bitflags! {
    /// [APOptions](https://www.rfc-editor.org/rfc/rfc4120#section-5.5.1)
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ApOptions: u32 {
        const USE_SESSION_KEY = 0x40000000;
        const MUTUAL_REQUIRED = 0x20000000;
    }
}

impl From<GssFlags> for ApOptions {
    fn from(flags: GssFlags) -> Self {
        let mut ap_options = ApOptions::empty();

        if flags.contains(GssFlags::MUTUAL_AUTH) {
            ap_options |= ApOptions::MUTUAL_REQUIRED;
        }

        ap_options
    }
}
