//! Rotating client identities for outbound requests.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Engine {
    Chromium,
    Gecko,
    WebKit,
}

#[derive(Debug)]
struct Signature {
    user_agent: &'static str,
    engine: Engine,
    /// `Sec-CH-UA` brand list, Chromium only.
    brands: Option<&'static str>,
    platform: &'static str,
    mobile: bool,
}

/// Browser signatures the provider rotates through.
const SIGNATURES: &[Signature] = &[
    // Chrome on Windows
    Signature {
        user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
        engine: Engine::Chromium,
        brands: Some(r#""Google Chrome";v="131", "Chromium";v="131", "Not_A Brand";v="24""#),
        platform: "Windows",
        mobile: false,
    },
    Signature {
        user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/130.0.0.0 Safari/537.36",
        engine: Engine::Chromium,
        brands: Some(r#""Chromium";v="130", "Google Chrome";v="130", "Not?A_Brand";v="99""#),
        platform: "Windows",
        mobile: false,
    },
    // Chrome on Mac
    Signature {
        user_agent: "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
        engine: Engine::Chromium,
        brands: Some(r#""Google Chrome";v="131", "Chromium";v="131", "Not_A Brand";v="24""#),
        platform: "macOS",
        mobile: false,
    },
    // Chrome on Linux
    Signature {
        user_agent: "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
        engine: Engine::Chromium,
        brands: Some(r#""Google Chrome";v="131", "Chromium";v="131", "Not_A Brand";v="24""#),
        platform: "Linux",
        mobile: false,
    },
    // Edge on Windows
    Signature {
        user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36 Edg/131.0.0.0",
        engine: Engine::Chromium,
        brands: Some(r#""Microsoft Edge";v="131", "Chromium";v="131", "Not_A Brand";v="24""#),
        platform: "Windows",
        mobile: false,
    },
    // Firefox on Windows
    Signature {
        user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:133.0) Gecko/20100101 Firefox/133.0",
        engine: Engine::Gecko,
        brands: None,
        platform: "Windows",
        mobile: false,
    },
    // Firefox on Mac
    Signature {
        user_agent: "Mozilla/5.0 (Macintosh; Intel Mac OS X 10.15; rv:133.0) Gecko/20100101 Firefox/133.0",
        engine: Engine::Gecko,
        brands: None,
        platform: "macOS",
        mobile: false,
    },
    // Firefox on Linux
    Signature {
        user_agent: "Mozilla/5.0 (X11; Ubuntu; Linux x86_64; rv:132.0) Gecko/20100101 Firefox/132.0",
        engine: Engine::Gecko,
        brands: None,
        platform: "Linux",
        mobile: false,
    },
    // Safari on Mac
    Signature {
        user_agent: "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/18.1 Safari/605.1.15",
        engine: Engine::WebKit,
        brands: None,
        platform: "macOS",
        mobile: false,
    },
    Signature {
        user_agent: "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.6 Safari/605.1.15",
        engine: Engine::WebKit,
        brands: None,
        platform: "macOS",
        mobile: false,
    },
    // Safari on iPhone
    Signature {
        user_agent: "Mozilla/5.0 (iPhone; CPU iPhone OS 18_1 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/18.1 Mobile/15E148 Safari/604.1",
        engine: Engine::WebKit,
        brands: None,
        platform: "iOS",
        mobile: true,
    },
    // Chrome on Android
    Signature {
        user_agent: "Mozilla/5.0 (Linux; Android 14; Pixel 8) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Mobile Safari/537.36",
        engine: Engine::Chromium,
        brands: Some(r#""Google Chrome";v="131", "Chromium";v="131", "Not_A Brand";v="24""#),
        platform: "Android",
        mobile: true,
    },
];

const ACCEPT_LANGUAGES: &[&str] = &[
    "en-US,en;q=0.9",
    "en-GB,en;q=0.9",
    "en-US,en;q=0.8",
    "en-GB,en-US;q=0.9,en;q=0.8",
];

/// A client identity for one request. Passed by value into each fetch so
/// no headers are shared between concurrent requests.
#[derive(Debug, Clone)]
pub struct RequestProfile {
    pub signature: usize,
    pub user_agent: String,
    pub headers: Vec<(String, String)>,
    pub jitter_range: (Duration, Duration),
    pub proxy: Option<String>,
}

impl RequestProfile {
    pub fn sample_delay<R: Rng>(&self, rng: &mut R) -> Duration {
        let (min, max) = self.jitter_range;
        if max <= min {
            return min;
        }
        rng.gen_range(min..=max)
    }

    /// Sleeps for a uniformly sampled duration within the jitter range.
    pub async fn apply_delay(&self) {
        let delay = self.sample_delay(&mut rand::thread_rng());
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }

    #[cfg(test)]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

struct RotationState {
    rng: StdRng,
    last_signature: HashMap<String, usize>,
    next_proxy: usize,
}

pub struct ProfileProvider {
    state: Mutex<RotationState>,
    jitter_range: (Duration, Duration),
    proxies: Vec<String>,
}

impl ProfileProvider {
    pub fn new(jitter_range: (Duration, Duration), proxies: Vec<String>) -> Self {
        Self::with_rng(StdRng::from_entropy(), jitter_range, proxies)
    }

    pub fn with_rng(rng: StdRng, jitter_range: (Duration, Duration), proxies: Vec<String>) -> Self {
        Self {
            state: Mutex::new(RotationState {
                rng,
                last_signature: HashMap::new(),
                next_proxy: 0,
            }),
            jitter_range,
            proxies,
        }
    }

    #[cfg(test)]
    pub fn pool_size() -> usize {
        SIGNATURES.len()
    }

    /// Picks a signature for `source`, never the one it used last.
    pub async fn next_profile(&self, source: &str) -> RequestProfile {
        let mut state = self.state.lock().await;
        let key = source.to_lowercase();

        let index = match state.last_signature.get(&key).copied() {
            Some(last) => {
                // Draw from the pool minus the previous index.
                let pick = state.rng.gen_range(0..SIGNATURES.len() - 1);
                if pick >= last { pick + 1 } else { pick }
            }
            None => state.rng.gen_range(0..SIGNATURES.len()),
        };
        state.last_signature.insert(key, index);

        let language = ACCEPT_LANGUAGES[state.rng.gen_range(0..ACCEPT_LANGUAGES.len())];
        let dnt = state.rng.gen_bool(0.5);

        let proxy = if self.proxies.is_empty() {
            None
        } else {
            let p = self.proxies[state.next_proxy % self.proxies.len()].clone();
            state.next_proxy = state.next_proxy.wrapping_add(1);
            Some(p)
        };

        let signature = &SIGNATURES[index];
        RequestProfile {
            signature: index,
            user_agent: signature.user_agent.to_string(),
            headers: build_headers(signature, language, dnt),
            jitter_range: self.jitter_range,
            proxy,
        }
    }
}

fn build_headers(signature: &Signature, language: &str, dnt: bool) -> Vec<(String, String)> {
    let accept = match signature.engine {
        Engine::Gecko => "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
        Engine::WebKit => "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
        Engine::Chromium => {
            "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,image/apng,*/*;q=0.8"
        }
    };

    let mut headers = vec![
        ("Accept".to_string(), accept.to_string()),
        ("Accept-Language".to_string(), language.to_string()),
        ("Accept-Encoding".to_string(), "gzip, deflate, br".to_string()),
        ("Upgrade-Insecure-Requests".to_string(), "1".to_string()),
    ];

    if let Some(brands) = signature.brands {
        headers.push(("Sec-CH-UA".to_string(), brands.to_string()));
        headers.push((
            "Sec-CH-UA-Mobile".to_string(),
            if signature.mobile { "?1" } else { "?0" }.to_string(),
        ));
        headers.push((
            "Sec-CH-UA-Platform".to_string(),
            format!("\"{}\"", signature.platform),
        ));
    }

    if signature.engine != Engine::WebKit {
        headers.push(("Sec-Fetch-Dest".to_string(), "document".to_string()));
        headers.push(("Sec-Fetch-Mode".to_string(), "navigate".to_string()));
        headers.push(("Sec-Fetch-Site".to_string(), "none".to_string()));
        headers.push(("Sec-Fetch-User".to_string(), "?1".to_string()));
    }

    headers.push(("Cache-Control".to_string(), "max-age=0".to_string()));
    if dnt {
        headers.push(("DNT".to_string(), "1".to_string()));
    }
    headers
}
