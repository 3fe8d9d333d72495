use core::fmt;

/// Kernel version packed as `(major << 24) + (minor << 16) + sub`, so plain
/// integer comparison orders releases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct KernelVersion(u32);

/// Branches receiving long term support.
pub const LTS_BRANCHES: [(u32, u32); 9] = [
    (4, 4),
    (4, 9),
    (4, 14),
    (4, 19),
    (5, 4),
    (5, 10),
    (5, 15),
    (6, 1),
    (6, 6),
];

/// Minimum point release per branch required on Android V.
pub const V_MIN_POINT_RELEASES: [((u32, u32), u32); 6] = [
    ((4, 19), 236),
    ((5, 4), 186),
    ((5, 10), 199),
    ((5, 15), 136),
    ((6, 1), 57),
    ((6, 6), 0),
];

const fn saturate(v: u32, max: u32) -> u32 {
    if v > max {
        max
    } else {
        v
    }
}

impl KernelVersion {
    /// Components saturate at their field width (8, 8 and 16 bits).
    pub const fn new(major: u32, minor: u32, sub: u32) -> KernelVersion {
        KernelVersion(
            (saturate(major, 0xff) << 24) + (saturate(minor, 0xff) << 16) + saturate(sub, 0xffff),
        )
    }

    pub const fn packed(&self) -> u32 {
        self.0
    }

    pub const fn major(&self) -> u32 {
        self.0 >> 24
    }

    pub const fn minor(&self) -> u32 {
        (self.0 >> 16) & 0xff
    }

    pub const fn sub(&self) -> u32 {
        self.0 & 0xffff
    }

    /// Parses a kernel release like `5.10.199-android13-4-gd3ad`. Reads the
    /// leading digits of up to three dot separated components and stops at
    /// the first component that does not start with a digit; anything not
    /// read is zero.
    pub fn parse(release: &str) -> KernelVersion {
        let mut parts = [0u32; 3];
        let mut rest = release.trim_start();

        for (i, part) in parts.iter_mut().enumerate() {
            if i > 0 {
                match rest.strip_prefix('.') {
                    Some(r) => rest = r,
                    None => break,
                }
            }
            let digits = rest.bytes().take_while(u8::is_ascii_digit).count();
            if digits == 0 {
                break;
            }
            // only overflow can fail here
            *part = rest[..digits].parse().unwrap_or(u32::MAX);
            rest = &rest[digits..];
        }

        KernelVersion::new(parts[0], parts[1], parts[2])
    }

    pub fn is_at_least(&self, major: u32, minor: u32, sub: u32) -> bool {
        *self >= KernelVersion::new(major, minor, sub)
    }

    /// True for any release of the `major.minor` branch.
    pub fn is_kernel_version(&self, major: u32, minor: u32) -> bool {
        self.is_at_least(major, minor, 0) && !self.is_at_least(major, minor + 1, 0)
    }

    /// `lo` inclusive, `hi` exclusive.
    pub fn is_in_range(&self, lo: KernelVersion, hi: KernelVersion) -> bool {
        *self >= lo && *self < hi
    }

    pub fn is_lts(&self) -> bool {
        LTS_BRANCHES
            .iter()
            .any(|&(major, minor)| self.is_kernel_version(major, minor))
    }

    /// The point release this kernel's branch must reach on Android V, if
    /// the branch has one.
    pub fn v_min_point_release(&self) -> Option<KernelVersion> {
        V_MIN_POINT_RELEASES
            .iter()
            .find(|((major, minor), _)| self.is_kernel_version(*major, *minor))
            .map(|&((major, minor), sub)| KernelVersion::new(major, minor, sub))
    }

    /// Kernels carrying the UDP GRO/fraglist fixes tether offload needs.
    pub fn supports_udp_offload(&self) -> bool {
        self.is_in_range(KernelVersion::new(4, 14, 222), KernelVersion::new(4, 19, 0))
            || self.is_in_range(KernelVersion::new(4, 19, 176), KernelVersion::new(5, 4, 0))
            || self.is_at_least(5, 4, 98)
    }
}

impl fmt::Display for KernelVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major(), self.minor(), self.sub())
    }
}

impl fmt::LowerHex for KernelVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::LowerHex::fmt(&self.0, f)
    }
}
