//! Social state — follows, followers, inbox, posts, and likes.
//!
//! Pure bookkeeping: no sockets, no tokens. The controller authorizes a
//! record before any method here runs, so every mutation below assumes the
//! caller already proved the sender may perform it.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use lsnp_core::message::{Dm, LikeAction, Post as PostMsg};
use lsnp_core::PeerId;

/// A post as retained locally, either authored here or received from a
/// followed peer. Identified by its timestamp-unique id.
#[derive(Debug, Clone, PartialEq)]
pub struct Post {
    pub id: String,
    pub author: PeerId,
    pub content: String,
    pub ttl_seconds: u32,
    pub created_at: u64,
}

impl Post {
    pub fn expired(&self, now: u64) -> bool {
        now > self.created_at.saturating_add(u64::from(self.ttl_seconds))
    }
}

/// One delivered inbox line (DMs, group messages, notifications).
#[derive(Debug, Clone, PartialEq)]
pub struct InboxEntry {
    pub timestamp: u64,
    pub from: PeerId,
    pub content: String,
}

#[derive(Default)]
pub struct SocialState {
    following: Mutex<HashSet<PeerId>>,
    followers: Mutex<HashSet<PeerId>>,
    inbox: Mutex<Vec<InboxEntry>>,
    posts_seen: Mutex<HashMap<String, Post>>,
    my_posts: Mutex<HashMap<String, Post>>,
    /// My outgoing like state per post id, for correct toggling.
    my_likes: Mutex<HashMap<String, LikeAction>>,
    /// Authoritative per-post like sets for posts I authored.
    post_likes: Mutex<HashMap<String, HashSet<PeerId>>>,
}

impl SocialState {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Follow bookkeeping ───────────────────────────────────────────────────

    /// An authorized FOLLOW arrived: the sender now follows us.
    pub fn add_follower(&self, peer: PeerId) -> bool {
        self.followers.lock().unwrap().insert(peer)
    }

    /// An authorized UNFOLLOW arrived.
    pub fn remove_follower(&self, peer: &PeerId) -> bool {
        self.followers.lock().unwrap().remove(peer)
    }

    pub fn followers(&self) -> Vec<PeerId> {
        self.followers.lock().unwrap().iter().cloned().collect()
    }

    /// Local decision to follow a peer. Returns false if already following.
    pub fn start_following(&self, peer: PeerId) -> bool {
        self.following.lock().unwrap().insert(peer)
    }

    /// Local decision to unfollow. Returns false if we weren't following.
    pub fn stop_following(&self, peer: &PeerId) -> bool {
        self.following.lock().unwrap().remove(peer)
    }

    pub fn is_following(&self, peer: &PeerId) -> bool {
        self.following.lock().unwrap().contains(peer)
    }

    pub fn following(&self) -> Vec<PeerId> {
        self.following.lock().unwrap().iter().cloned().collect()
    }

    // ── Inbox ────────────────────────────────────────────────────────────────

    pub fn deliver_dm(&self, dm: &Dm) {
        self.inbox.lock().unwrap().push(InboxEntry {
            timestamp: dm.timestamp,
            from: dm.from.clone(),
            content: dm.content.clone(),
        });
    }

    pub fn deliver_notice(&self, from: PeerId, timestamp: u64, content: String) {
        self.inbox.lock().unwrap().push(InboxEntry {
            timestamp,
            from,
            content,
        });
    }

    pub fn inbox(&self) -> Vec<InboxEntry> {
        self.inbox.lock().unwrap().clone()
    }

    // ── Posts ────────────────────────────────────────────────────────────────

    /// Store a post received from a peer. Only posts from followed authors
    /// are retained; anything else is dropped and reported false.
    pub fn record_post(&self, post: &PostMsg) -> bool {
        if !self.is_following(&post.from) {
            return false;
        }
        let post = Post {
            id: post.timestamp.to_string(),
            author: post.from.clone(),
            content: post.content.clone(),
            ttl_seconds: post.ttl_seconds,
            created_at: post.timestamp,
        };
        self.posts_seen.lock().unwrap().insert(post.id.clone(), post);
        true
    }

    /// Author a post locally. The id is the creation timestamp, bumped until
    /// unique so two posts in one second stay distinguishable.
    pub fn create_post(&self, author: PeerId, content: String, ttl_seconds: u32, now: u64) -> Post {
        let mut my_posts = self.my_posts.lock().unwrap();
        let mut ts = now;
        while my_posts.contains_key(&ts.to_string()) {
            ts += 1;
        }
        let post = Post {
            id: ts.to_string(),
            author,
            content,
            ttl_seconds,
            created_at: ts,
        };
        my_posts.insert(post.id.clone(), post.clone());
        post
    }

    /// Posts received from others, minus expired ones.
    pub fn posts_seen(&self, now: u64) -> Vec<Post> {
        let mut posts: Vec<Post> = self
            .posts_seen
            .lock()
            .unwrap()
            .values()
            .filter(|p| !p.expired(now))
            .cloned()
            .collect();
        posts.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        posts
    }

    pub fn my_post(&self, post_id: &str) -> Option<Post> {
        self.my_posts.lock().unwrap().get(post_id).cloned()
    }

    // ── Likes ────────────────────────────────────────────────────────────────

    /// Flip my like state for a post someone else authored and return the
    /// action to transmit.
    pub fn toggle_my_like(&self, post_id: &str) -> LikeAction {
        let mut my_likes = self.my_likes.lock().unwrap();
        let next = match my_likes.get(post_id) {
            Some(LikeAction::Like) => LikeAction::Unlike,
            _ => LikeAction::Like,
        };
        my_likes.insert(post_id.to_string(), next);
        next
    }

    /// Apply an inbound LIKE to a post I authored. Returns false when the
    /// post id is unknown (the record is dropped by the caller).
    pub fn apply_like(&self, post_id: &str, liker: PeerId, action: LikeAction) -> bool {
        if !self.my_posts.lock().unwrap().contains_key(post_id) {
            return false;
        }
        let mut post_likes = self.post_likes.lock().unwrap();
        let likers = post_likes.entry(post_id.to_string()).or_default();
        match action {
            LikeAction::Like => likers.insert(liker),
            LikeAction::Unlike => likers.remove(&liker),
        };
        true
    }

    /// Who currently likes one of my posts.
    pub fn likes_on(&self, post_id: &str) -> Vec<PeerId> {
        self.post_likes
            .lock()
            .unwrap()
            .get(post_id)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lsnp_core::message::new_message_id;

    fn id(s: &str) -> PeerId {
        s.parse().unwrap()
    }

    fn post_from(author: &str, ts: u64) -> PostMsg {
        PostMsg {
            from: id(author),
            content: "hello".into(),
            ttl_seconds: 60,
            message_id: new_message_id(),
            timestamp: ts,
            token: "t".into(),
        }
    }

    #[test]
    fn follower_set_tracks_follow_unfollow() {
        let social = SocialState::new();
        assert!(social.add_follower(id("bob@10.0.0.2")));
        assert!(!social.add_follower(id("bob@10.0.0.2")));
        assert_eq!(social.followers().len(), 1);
        assert!(social.remove_follower(&id("bob@10.0.0.2")));
        assert!(social.followers().is_empty());
    }

    #[test]
    fn posts_from_unfollowed_authors_are_dropped() {
        let social = SocialState::new();
        assert!(!social.record_post(&post_from("carol@10.0.0.3", 100)));
        assert!(social.posts_seen(100).is_empty());

        social.start_following(id("carol@10.0.0.3"));
        assert!(social.record_post(&post_from("carol@10.0.0.3", 101)));
        assert_eq!(social.posts_seen(101).len(), 1);
    }

    #[test]
    fn expired_posts_are_not_returned() {
        let social = SocialState::new();
        social.start_following(id("carol@10.0.0.3"));
        social.record_post(&post_from("carol@10.0.0.3", 100));

        assert_eq!(social.posts_seen(150).len(), 1);
        assert!(social.posts_seen(161).is_empty());
    }

    #[test]
    fn post_ids_stay_unique_within_a_second() {
        let social = SocialState::new();
        let a = social.create_post(id("me@10.0.0.1"), "one".into(), 60, 500);
        let b = social.create_post(id("me@10.0.0.1"), "two".into(), 60, 500);
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn like_toggling_alternates() {
        let social = SocialState::new();
        assert_eq!(social.toggle_my_like("123"), LikeAction::Like);
        assert_eq!(social.toggle_my_like("123"), LikeAction::Unlike);
        assert_eq!(social.toggle_my_like("123"), LikeAction::Like);
    }

    #[test]
    fn author_holds_authoritative_like_set() {
        let social = SocialState::new();
        social.create_post(id("me@10.0.0.1"), "post".into(), 60, 700);
        let post_id = "700";

        assert!(social.apply_like(post_id, id("bob@10.0.0.2"), LikeAction::Like));
        assert_eq!(social.likes_on(post_id).len(), 1);

        assert!(social.apply_like(post_id, id("bob@10.0.0.2"), LikeAction::Unlike));
        assert!(social.likes_on(post_id).is_empty());

        // Unknown post: nothing to like.
        assert!(!social.apply_like("999", id("bob@10.0.0.2"), LikeAction::Like));
    }
}
