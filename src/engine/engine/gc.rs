//! Garbage collection.
//!
//! Runs after every insert. Domain collection keeps a single key under
//! `domain_max_cookies`, evicting by priority tier (low, medium, high) and, inside a
//! tier, non-secure cookies before secure ones, least recently accessed first.
//! Global collection keeps the whole store under `max_cookies` but never touches
//! cookies accessed within `safe_from_global_purge`.

use super::{CookieEngine, DeletionCause};
use crate::engine::cookies::{CanonicalCookie, CookiePriority, CookieSignature};
use std::cmp::Ordering;
use time::OffsetDateTime;

struct EvictionCandidate {
    key: String,
    signature: CookieSignature,
    priority: CookiePriority,
    secure: bool,
    last_access: Option<OffsetDateTime>,
    creation: Option<OffsetDateTime>,
}

impl EvictionCandidate {
    fn new(key: &str, cookie: &CanonicalCookie) -> Self {
        Self {
            key: key.to_string(),
            signature: cookie.signature(),
            priority: cookie.priority(),
            secure: cookie.is_secure(),
            last_access: cookie.last_access_date(),
            creation: cookie.creation_date(),
        }
    }
}

/// Least recently accessed first.
fn lra_sorter(a: &EvictionCandidate, b: &EvictionCandidate) -> Ordering {
    a.last_access.cmp(&b.last_access).then_with(|| a.creation.cmp(&b.creation))
}

impl CookieEngine {
    /// Returns the number of cookies deleted.
    pub(super) fn garbage_collect(&mut self, now: OffsetDateTime, key: &str) -> usize {
        let mut deleted = 0;

        let domain_max = self.config.domain_max_cookies;
        if self.jar.count_for_key(key) > domain_max {
            log::debug!("garbage collecting cookies for {key}");
            deleted += self.garbage_collect_expired(now, Some(key));

            let live = self.jar.count_for_key(key);
            if live > domain_max {
                let purge_goal = live - domain_max.saturating_sub(self.config.domain_purge_cookies);
                deleted += self.purge_domain(key, purge_goal);
            }
        }

        let max_cookies = self.config.max_cookies;
        let safe_date = now - self.config.safe_from_global_purge;
        let stale = self.earliest_access_time.map_or(true, |t| t < safe_date);
        if self.jar.len() > max_cookies && stale {
            log::debug!("garbage collecting all cookies");
            deleted += self.garbage_collect_expired(now, None);

            let live = self.jar.len();
            if live > max_cookies {
                let purge_goal =
                    live - max_cookies.saturating_sub(self.config.global_purge_cookies);
                deleted += self.purge_global(safe_date, purge_goal);
            }
        }

        deleted
    }

    fn garbage_collect_expired(&mut self, now: OffsetDateTime, key: Option<&str>) -> usize {
        let expired = match key {
            Some(key) => self
                .jar
                .cookies_for_key(key)
                .filter(|cookie| cookie.is_expired(now))
                .map(|cookie| (key.to_string(), cookie.signature()))
                .collect(),
            None => self.jar.find_all(|cookie| cookie.is_expired(now)),
        };

        let mut deleted = 0;
        for (key, signature) in expired {
            if self
                .internal_delete_cookie(&key, &signature, true, DeletionCause::Expired)
                .is_some()
            {
                deleted += 1;
            }
        }
        deleted
    }

    fn purge_domain(&mut self, key: &str, mut purge_goal: usize) -> usize {
        let mut candidates: Vec<EvictionCandidate> = self
            .jar
            .cookies_for_key(key)
            .map(|cookie| EvictionCandidate::new(key, cookie))
            .collect();
        candidates.sort_by(lra_sorter);

        let mut deleted = 0;
        for priority in [CookiePriority::Low, CookiePriority::Medium, CookiePriority::High] {
            for secure in [false, true] {
                let victims: Vec<&EvictionCandidate> = candidates
                    .iter()
                    .filter(|c| c.priority == priority && c.secure == secure)
                    .take(purge_goal)
                    .collect();

                for victim in victims {
                    if self
                        .internal_delete_cookie(
                            &victim.key,
                            &victim.signature,
                            true,
                            DeletionCause::EvictedDomain,
                        )
                        .is_some()
                    {
                        deleted += 1;
                        purge_goal -= 1;
                    }
                }
                if purge_goal == 0 {
                    return deleted;
                }
            }
        }
        deleted
    }

    fn purge_global(&mut self, safe_date: OffsetDateTime, purge_goal: usize) -> usize {
        let mut candidates: Vec<EvictionCandidate> =
            self.jar.iter().map(|(key, cookie)| EvictionCandidate::new(key, cookie)).collect();
        candidates.sort_by(lra_sorter);
        let (non_secure, secure): (Vec<_>, Vec<_>) =
            candidates.into_iter().partition(|c| !c.secure);

        let mut deleted = 0;
        'groups: for group in [non_secure, secure] {
            for candidate in group {
                if deleted >= purge_goal {
                    break 'groups;
                }
                // Sorted, so everything after this one was accessed recently too.
                if candidate.last_access.is_some_and(|t| t >= safe_date) {
                    break;
                }
                if self
                    .internal_delete_cookie(
                        &candidate.key,
                        &candidate.signature,
                        true,
                        DeletionCause::EvictedGlobal,
                    )
                    .is_some()
                {
                    deleted += 1;
                }
            }
        }

        self.earliest_access_time =
            self.jar.iter().filter_map(|(_, cookie)| cookie.last_access_date()).min();
        deleted
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::{all_cookies, engine_with, line, set_line, sink};
    use super::*;
    use crate::engine::config::CookieEngineConfig;
    use crate::engine::cookies::{
        CookieChangeCause, CookieChangeInfo, CookieLineFields, CookieSameSite,
    };
    use std::sync::{Arc, Mutex};
    use time::Duration;

    fn low(name: &str) -> CookieLineFields {
        CookieLineFields {
            priority: Some("low".into()),
            ..line(name, "1")
        }
    }

    fn with_priority(name: &str, priority: &str, secure: bool) -> CookieLineFields {
        CookieLineFields {
            priority: Some(priority.into()),
            secure,
            ..line(name, "1")
        }
    }

    #[test]
    fn domain_purge_keeps_newest_low_priority_cookies() {
        let mut engine = engine_with(None);
        let evicted = Arc::new(Mutex::new(Vec::new()));
        let out = evicted.clone();
        let _sub = engine.add_callback_for_all_changes(Arc::new(move |change: &CookieChangeInfo| {
            if change.cause == CookieChangeCause::Evicted {
                out.lock().unwrap().push(change.cookie.name().to_string());
            }
        }));

        for i in 0..181 {
            assert!(set_line(&mut engine, "http://a.com/", low(&format!("c{i}"))).is_include());
        }

        let cookies = all_cookies(&mut engine);
        assert_eq!(cookies.len(), 150);
        for i in 0..31 {
            assert!(!cookies.iter().any(|c| c.name() == format!("c{i}")));
        }
        for i in 31..181 {
            assert!(cookies.iter().any(|c| c.name() == format!("c{i}")));
        }
        assert_eq!(evicted.lock().unwrap().len(), 31);
    }

    #[test]
    fn domain_purge_respects_tiers() {
        let mut engine = engine_with(None);
        // The high priority cookies are the least recently used, and still survive.
        for i in 0..150 {
            set_line(
                &mut engine,
                "https://a.com/",
                with_priority(&format!("high{i}"), "high", false),
            );
        }
        for i in 0..21 {
            set_line(
                &mut engine,
                "https://a.com/",
                with_priority(&format!("low_secure{i}"), "low", true),
            );
        }
        for i in 0..10 {
            set_line(
                &mut engine,
                "https://a.com/",
                with_priority(&format!("low{i}"), "low", false),
            );
        }

        let cookies = all_cookies(&mut engine);
        assert_eq!(cookies.len(), 150);
        assert!(cookies.iter().all(|c| c.priority() == CookiePriority::High));
    }

    #[test]
    fn domain_purge_evicts_non_secure_before_secure() {
        let mut engine = engine_with(None);
        for i in 0..170 {
            set_line(
                &mut engine,
                "https://a.com/",
                with_priority(&format!("secure{i}"), "medium", true),
            );
        }
        for i in 0..11 {
            set_line(
                &mut engine,
                "https://a.com/",
                with_priority(&format!("plain{i}"), "medium", false),
            );
        }

        let cookies = all_cookies(&mut engine);
        assert_eq!(cookies.len(), 150);
        assert!(cookies.iter().all(|c| c.is_secure()));
        // The 20 oldest secure cookies made up the rest of the purge.
        assert!(!cookies.iter().any(|c| c.name() == "secure19"));
        assert!(cookies.iter().any(|c| c.name() == "secure20"));
    }

    #[test]
    fn expired_cookies_go_first() {
        let config = CookieEngineConfig {
            domain_max_cookies: 3,
            domain_purge_cookies: 1,
            ..Default::default()
        };
        let mut engine = CookieEngine::new(None, Some(config));
        let t0 = OffsetDateTime::now_utc() - Duration::days(1);
        let cookie = |name: &str, expiry: OffsetDateTime| {
            CanonicalCookie::new(
                name,
                "1",
                "a.com",
                "/",
                Some(t0),
                Some(expiry),
                Some(t0),
                false,
                false,
                CookieSameSite::Lax,
                CookiePriority::Medium,
            )
        };

        // set_all_cookies skips cookies that are expired when they are set, so the
        // expiry here is only moments away.
        let soon = OffsetDateTime::now_utc() + Duration::milliseconds(200);
        let later = OffsetDateTime::now_utc() + Duration::days(1);
        let out = Arc::new(Mutex::new(Vec::new()));
        engine.set_all_cookies_async(
            vec![cookie("a", later), cookie("b", soon), cookie("c", later)],
            sink(&out),
        );
        engine.tick();
        std::thread::sleep(std::time::Duration::from_millis(300));

        set_line(&mut engine, "http://a.com/", line("d", "1"));
        let names: Vec<String> =
            all_cookies(&mut engine).iter().map(|c| c.name().to_string()).collect();
        assert_eq!(names.len(), 3);
        assert!(!names.contains(&"b".to_string()));
    }

    fn old_cookie(
        name: &str,
        domain: &str,
        secure: bool,
        last_access: OffsetDateTime,
    ) -> CanonicalCookie {
        CanonicalCookie::new(
            name,
            "1",
            domain,
            "/",
            Some(last_access - Duration::days(1)),
            None,
            Some(last_access),
            secure,
            false,
            CookieSameSite::Lax,
            CookiePriority::Medium,
        )
    }

    fn global_config() -> CookieEngineConfig {
        CookieEngineConfig {
            max_cookies: 10,
            global_purge_cookies: 3,
            ..Default::default()
        }
    }

    #[test]
    fn global_purge_evicts_old_non_secure_cookies_first() {
        let mut engine = CookieEngine::new(None, Some(global_config()));
        let long_ago = OffsetDateTime::now_utc() - Duration::days(60);

        let mut cookies = Vec::new();
        for i in 0..6 {
            let (name, domain) = (format!("plain{i}"), format!("p{i}.com"));
            cookies.push(old_cookie(&name, &domain, false, long_ago + Duration::seconds(i)));
        }
        for i in 0..5 {
            let (name, domain) = (format!("secure{i}"), format!("s{i}.com"));
            cookies.push(old_cookie(&name, &domain, true, long_ago + Duration::seconds(10 + i)));
        }
        let out = Arc::new(Mutex::new(Vec::new()));
        engine.set_all_cookies_async(cookies, sink(&out));
        engine.tick();

        let names: Vec<String> =
            all_cookies(&mut engine).iter().map(|c| c.name().to_string()).collect();
        assert_eq!(names.len(), 7);
        assert!(names.contains(&"plain4".to_string()));
        assert!(names.contains(&"plain5".to_string()));
        assert!((0..5).all(|i| names.contains(&format!("secure{i}"))));
    }

    #[test]
    fn recently_accessed_cookies_are_safe_from_global_purge() {
        let mut engine = CookieEngine::new(None, Some(global_config()));
        let recent = OffsetDateTime::now_utc() - Duration::days(1);

        let cookies = (0..11)
            .map(|i| {
                let last_access = recent + Duration::seconds(i);
                old_cookie(&format!("c{i}"), &format!("d{i}.com"), false, last_access)
            })
            .collect();
        let out = Arc::new(Mutex::new(Vec::new()));
        engine.set_all_cookies_async(cookies, sink(&out));
        engine.tick();

        assert_eq!(all_cookies(&mut engine).len(), 11);
    }
}
