#![forbid(unsafe_code)]

//! Discovery codes: short, shareable stand-ins for a public `address:port`.
//!
//! The first octet selects a word from a fixed 256-entry table and the other
//! three octets become five base-36 digits, e.g. `TORCH-00MBP`. The default
//! IPX port is implied; any other port is appended as `-P` plus four base-36
//! digits (`ATLAS-00001-P0FFK`). Decoding is case-insensitive.

use std::{collections::HashMap, fmt, net::Ipv4Addr, str::FromStr};

use ipxlink_core::{Endpoint, IpxError, IpxResult, DEFAULT_PORT};
use once_cell::sync::Lazy;
use tracing::debug;

const BASE36: &[u8; 36] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";
const ADDR_DIGITS: usize = 5;
const PORT_DIGITS: usize = 4;
const PORT_PREFIX: char = 'P';

/// Indexed by first octet.
const WORDS: [&str; 256] = [
    "ACID", "AGENT", "ALIEN", "ALPHA", "AMIGA", "ANVIL", "APEX", "ARCADE",
    "ARMOR", "ARROW", "ATLAS", "ATOM", "AXE", "BADGE", "BASIC", "BASS",
    "BATCH", "BEAM", "BEAST", "BIOS", "BISHOP", "BLADE", "BLAST", "BLAZE",
    "BLOCK", "BOLT", "BOMB", "BONUS", "BOOT", "BOSS", "BRICK", "BUG",
    "BYTE", "CABLE", "CACHE", "CANNON", "CASTLE", "CAVE", "CHAIN", "CHAOS",
    "CHIP", "CIPHER", "CLAW", "CLONE", "COBRA", "CODE", "COIN", "COMET",
    "CORE", "CRANK", "CRASH", "CROWN", "CRYPT", "CUBE", "CYBER", "DAGGER",
    "DASH", "DEMON", "DISK", "DOOM", "DRAGON", "DRIVE", "DRONE", "DUKE",
    "DUNGEON", "DUST", "EAGLE", "ECHO", "EDGE", "EMBER", "EPIC", "EXIT",
    "FALCON", "FANG", "FIRE", "FLAME", "FLARE", "FLASH", "FLOPPY", "FORGE",
    "FORT", "FROST", "FUSE", "GALAXY", "GAMMA", "GATE", "GEAR", "GHOST",
    "GIANT", "GLITCH", "GOBLIN", "GOLD", "GOLEM", "GRID", "HACK", "HAMMER",
    "HAWK", "HELM", "HERO", "HEX", "HYDRA", "ICE", "INDEX", "IRON",
    "JADE", "JET", "JOLT", "JOY", "JUMP", "KARMA", "KERNEL", "KEY",
    "KING", "KNIGHT", "LANCE", "LASER", "LAVA", "LEVEL", "LION", "LOGIC",
    "LOOP", "LORD", "LOTUS", "LUNAR", "MACE", "MAGE", "MAGIC", "MAZE",
    "MECH", "MEGA", "MENU", "METAL", "METEOR", "MODEM", "MONK", "MOON",
    "MOUSE", "NEBULA", "NEON", "NINJA", "NITRO", "NOVA", "OMEGA", "ONYX",
    "ORACLE", "ORB", "ORBIT", "PACKET", "PANDA", "PANEL", "PATCH", "PHASE",
    "PIXEL", "PLASMA", "PORT", "POWER", "PRISM", "PROBE", "PULSE", "QUAKE",
    "QUEST", "RADAR", "RAGE", "RAID", "RAPTOR", "RAVEN", "REALM", "REBEL",
    "RELIC", "RIFT", "ROBOT", "ROCKET", "ROGUE", "RUNE", "SABER", "SAGE",
    "SCROLL", "SECTOR", "SHADOW", "SHARD", "SHELL", "SHIELD", "SIGNAL", "SKULL",
    "SLIME", "SONIC", "SPARK", "SPELL", "SPHERE", "SPIDER", "SPIKE", "SPRITE",
    "STACK", "STAR", "STEEL", "STORM", "SWORD", "TANK", "TERM", "THUNDER",
    "TIGER", "TITAN", "TOKEN", "TORCH", "TOWER", "TRAP", "TROLL", "TURBO",
    "ULTRA", "UNDEAD", "UNIT", "VAULT", "VECTOR", "VENOM", "VIPER", "VIRUS",
    "VOID", "VOLT", "VORTEX", "WARP", "WIZARD", "WOLF", "WORM", "WRAITH",
    "XENON", "YETI", "ZAP", "ZERO", "ZONE", "ZOMBIE", "ABYSS", "ACORN",
    "BARON", "BEACON", "BOULDER", "CANYON", "CHARM", "COMBO", "DELTA", "DYNAMO",
    "ELF", "FABLE", "FLUX", "GAZER", "GRAIL", "HARPY", "IMP", "JINX",
    "KOBOLD", "LEGEND", "MANTIS", "NOMAD", "OGRE", "PHOENIX", "QUARTZ", "RIDDLE",
];

static WORD_INDEX: Lazy<HashMap<&'static str, u8>> = Lazy::new(|| {
    WORDS
        .iter()
        .enumerate()
        .map(|(i, w)| (*w, i as u8))
        .collect()
});

fn to_base36(mut n: u32, width: usize) -> String {
    let mut out = vec![b'0'; width];
    for slot in out.iter_mut().rev() {
        *slot = BASE36[(n % 36) as usize];
        n /= 36;
    }
    debug_assert_eq!(n, 0, "value does not fit in {width} base-36 digits");
    out.into_iter().map(char::from).collect()
}

fn from_base36(s: &str) -> Option<u32> {
    s.bytes().try_fold(0u32, |acc, b| {
        let digit = match b {
            b'0'..=b'9' => b - b'0',
            b'A'..=b'Z' => b - b'A' + 10,
            _ => return None,
        };
        acc.checked_mul(36)?.checked_add(u32::from(digit))
    })
}

/// A validated, normalised (uppercase) discovery code.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DiscoveryCode {
    code: String,
    endpoint: Endpoint,
}

impl DiscoveryCode {
    /// Encode an endpoint. Total and deterministic.
    #[must_use]
    pub fn encode(endpoint: Endpoint) -> Self {
        let [a, b, c, d] = endpoint.address().octets();
        let rest = (u32::from(b) << 16) | (u32::from(c) << 8) | u32::from(d);
        let mut code = format!("{}-{}", WORDS[a as usize], to_base36(rest, ADDR_DIGITS));
        if endpoint.port() != DEFAULT_PORT {
            code.push('-');
            code.push(PORT_PREFIX);
            code.push_str(&to_base36(u32::from(endpoint.port()), PORT_DIGITS));
        }
        Self { code, endpoint }
    }

    /// Endpoint this code stands for.
    #[must_use]
    pub fn endpoint(&self) -> Endpoint {
        self.endpoint
    }

    /// Whether the code carries its own port suffix.
    #[must_use]
    pub fn has_port_suffix(&self) -> bool {
        self.endpoint.port() != DEFAULT_PORT
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.code
    }
}

impl fmt::Display for DiscoveryCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.code)
    }
}

impl FromStr for DiscoveryCode {
    type Err = IpxError;

    fn from_str(s: &str) -> IpxResult<Self> {
        let endpoint = decode(s)?;
        Ok(Self::encode(endpoint))
    }
}

/// Decode a code back to its endpoint.
pub fn decode(code: &str) -> IpxResult<Endpoint> {
    let normalised = code.trim().to_ascii_uppercase();
    let parts: Vec<&str> = normalised.split('-').collect();
    let (word, digits, port_part) = match parts.as_slice() {
        [word, digits] => (*word, *digits, None),
        [word, digits, port] => (*word, *digits, Some(*port)),
        _ => {
            return Err(IpxError::InvalidCode(format!(
                "expected WORD-XXXXX or WORD-XXXXX-Pxxxx, got '{normalised}'"
            )))
        }
    };

    let first = *WORD_INDEX
        .get(word)
        .ok_or_else(|| IpxError::InvalidCode(format!("unknown word '{word}'")))?;

    if digits.len() != ADDR_DIGITS {
        return Err(IpxError::InvalidCode(format!(
            "address section must be {ADDR_DIGITS} characters, got {}",
            digits.len()
        )));
    }
    let rest = from_base36(digits)
        .ok_or_else(|| IpxError::InvalidCode(format!("'{digits}' is not base 36")))?;
    if rest > 0x00FF_FFFF {
        return Err(IpxError::InvalidCode(format!("address section '{digits}' out of range")));
    }

    let port = match port_part {
        None => DEFAULT_PORT,
        Some(p) => {
            let digits = p
                .strip_prefix(PORT_PREFIX)
                .filter(|d| d.len() == PORT_DIGITS)
                .ok_or_else(|| IpxError::InvalidCode(format!("invalid port section '{p}'")))?;
            let port = from_base36(digits)
                .ok_or_else(|| IpxError::InvalidCode(format!("'{digits}' is not base 36")))?;
            match u16::try_from(port) {
                Ok(port) if port != 0 => port,
                _ => return Err(IpxError::InvalidCode(format!("port {port} out of range"))),
            }
        }
    };

    let [_, b, c, d] = rest.to_be_bytes();
    Endpoint::new(Ipv4Addr::new(first, b, c, d), port)
        .map_err(|e| IpxError::InvalidCode(e.to_string()))
}

/// Outcome of [`resolve_host`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedHost {
    pub endpoint: Endpoint,
    /// `true` when the input was a discovery code rather than a raw address.
    pub from_code: bool,
}

/// Accept either a dotted-quad address (LAN) or a discovery code (Internet).
///
/// Raw addresses pair with `default_port`; codes carry their own port.
pub fn resolve_host(input: &str, default_port: u16) -> IpxResult<ResolvedHost> {
    let trimmed = input.trim();
    if let Ok(address) = trimmed.parse::<Ipv4Addr>() {
        let endpoint = Endpoint::new(address, default_port)
            .map_err(|_| IpxError::InvalidHost(input.to_string()))?;
        return Ok(ResolvedHost { endpoint, from_code: false });
    }
    match decode(trimmed) {
        Ok(endpoint) => {
            debug!(code = %trimmed, %endpoint, "resolved discovery code");
            Ok(ResolvedHost { endpoint, from_code: true })
        }
        Err(e) => {
            debug!(input = %trimmed, error = %e, "host is neither address nor code");
            Err(IpxError::InvalidHost(input.to_string()))
        }
    }
}
