//! Interest management - spatial index and per-session visibility sets

use std::collections::{HashMap, HashSet};
use uuid::Uuid;

use crate::constants::{MAP_SIZE, VIEW_DISTANCE};
use crate::game::room::Player;

/// Axis-aligned box used for both tree nodes and queries
#[derive(Debug, Clone, Copy)]
struct Aabb {
    min_x: f32,
    min_y: f32,
    max_x: f32,
    max_y: f32,
}

impl Aabb {
    fn centered(x: f32, y: f32, half: f32) -> Self {
        Self {
            min_x: x - half,
            min_y: y - half,
            max_x: x + half,
            max_y: y + half,
        }
    }

    fn contains(&self, x: f32, y: f32) -> bool {
        x >= self.min_x && x <= self.max_x && y >= self.min_y && y <= self.max_y
    }

    fn intersects(&self, other: &Aabb) -> bool {
        self.min_x <= other.max_x
            && self.max_x >= other.min_x
            && self.min_y <= other.max_y
            && self.max_y >= other.min_y
    }
}

/// Points per leaf before it splits
const NODE_CAPACITY: usize = 8;

struct QuadNode {
    bounds: Aabb,
    points: Vec<(Uuid, f32, f32)>,
    children: Option<Box<[QuadNode; 4]>>,
}

impl QuadNode {
    fn new(bounds: Aabb) -> Self {
        Self {
            bounds,
            points: Vec::new(),
            children: None,
        }
    }

    fn insert(&mut self, id: Uuid, x: f32, y: f32) {
        if let Some(children) = self.children.as_mut() {
            for child in children.iter_mut() {
                if child.bounds.contains(x, y) {
                    child.insert(id, x, y);
                    return;
                }
            }
            // On a shared edge no child claimed it; keep it here.
            self.points.push((id, x, y));
            return;
        }

        self.points.push((id, x, y));
        if self.points.len() > NODE_CAPACITY {
            self.split();
        }
    }

    fn split(&mut self) {
        let b = self.bounds;
        let mid_x = (b.min_x + b.max_x) / 2.0;
        let mid_y = (b.min_y + b.max_y) / 2.0;

        // Degenerate node, don't recurse forever on coincident points.
        if mid_x - b.min_x < 1.0 || mid_y - b.min_y < 1.0 {
            return;
        }

        let quads = [
            Aabb { min_x: b.min_x, min_y: b.min_y, max_x: mid_x, max_y: mid_y },
            Aabb { min_x: mid_x, min_y: b.min_y, max_x: b.max_x, max_y: mid_y },
            Aabb { min_x: b.min_x, min_y: mid_y, max_x: mid_x, max_y: b.max_y },
            Aabb { min_x: mid_x, min_y: mid_y, max_x: b.max_x, max_y: b.max_y },
        ];
        self.children = Some(Box::new(quads.map(QuadNode::new)));

        let points = std::mem::take(&mut self.points);
        for (id, x, y) in points {
            self.insert(id, x, y);
        }
    }

    fn query(&self, area: &Aabb, out: &mut Vec<Uuid>) {
        if !self.bounds.intersects(area) {
            return;
        }
        for &(id, x, y) in &self.points {
            if area.contains(x, y) {
                out.push(id);
            }
        }
        if let Some(children) = self.children.as_ref() {
            for child in children.iter() {
                child.query(area, out);
            }
        }
    }
}

/// Point quadtree over the arena, rebuilt on every visibility refresh
pub struct QuadTree {
    root: QuadNode,
}

impl QuadTree {
    pub fn new() -> Self {
        // Slightly padded so solver epsilon never pushes a point outside.
        let half = MAP_SIZE / 2.0 + 64.0;
        Self {
            root: QuadNode::new(Aabb::centered(0.0, 0.0, half)),
        }
    }

    pub fn insert(&mut self, id: Uuid, x: f32, y: f32) {
        if self.root.bounds.contains(x, y) {
            self.root.insert(id, x, y);
        }
    }

    /// Ids inside the square of half-extent `half` centered on (x, y)
    pub fn query_square(&self, x: f32, y: f32, half: f32) -> Vec<Uuid> {
        let mut out = Vec::new();
        self.root.query(&Aabb::centered(x, y, half), &mut out);
        out
    }
}

impl Default for QuadTree {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-session visibility bookkeeping.
///
/// Player visibility runs through the quadtree at 1 Hz; bullet visibility is
/// granted once at spawn by a direct range scan so fast bullets never pop in
/// a second late, and never re-evaluated afterwards.
pub struct InterestManager {
    visible: HashMap<Uuid, HashSet<Uuid>>,
    granted_bullets: HashMap<Uuid, HashSet<Uuid>>,
    empty: HashSet<Uuid>,
}

impl InterestManager {
    pub fn new() -> Self {
        Self {
            visible: HashMap::new(),
            granted_bullets: HashMap::new(),
            empty: HashSet::new(),
        }
    }

    /// Rebuild the spatial index and recompute every session's visible peers
    pub fn refresh(&mut self, players: &HashMap<Uuid, Player>) {
        let mut tree = QuadTree::new();
        for (&id, player) in players {
            tree.insert(id, player.x, player.y);
        }

        self.visible.retain(|id, _| players.contains_key(id));
        for (&id, player) in players {
            let mut peers: HashSet<Uuid> = tree
                .query_square(player.x, player.y, VIEW_DISTANCE)
                .into_iter()
                .collect();
            peers.remove(&id);
            self.visible.insert(id, peers);
        }
    }

    /// Peers currently visible to `session` (self excluded; the session's own
    /// player is always replicated regardless)
    pub fn visible_players(&self, session: Uuid) -> &HashSet<Uuid> {
        self.visible.get(&session).unwrap_or(&self.empty)
    }

    /// Grant a freshly spawned bullet to every session whose player is within
    /// view distance of the spawn point. Runs sub-tick, bypassing the 1 Hz
    /// refresh.
    pub fn grant_bullet(&mut self, bullet_id: Uuid, x: f32, y: f32, players: &HashMap<Uuid, Player>) {
        for (&session, player) in players {
            let dx = player.x - x;
            let dy = player.y - y;
            if (dx * dx + dy * dy).sqrt() < VIEW_DISTANCE {
                self.granted_bullets
                    .entry(session)
                    .or_default()
                    .insert(bullet_id);
            }
        }
    }

    /// Bullets `session` has been granted visibility of
    pub fn granted_bullets(&self, session: Uuid) -> &HashSet<Uuid> {
        self.granted_bullets.get(&session).unwrap_or(&self.empty)
    }

    /// Drop a bullet from every grant set once its replicated state is gone
    pub fn forget_bullet(&mut self, bullet_id: Uuid) {
        for grants in self.granted_bullets.values_mut() {
            grants.remove(&bullet_id);
        }
    }

    /// Drop all bookkeeping for a destroyed session
    pub fn remove_session(&mut self, session: Uuid) {
        self.visible.remove(&session);
        self.granted_bullets.remove(&session);
    }
}

impl Default for InterestManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::room::Player;

    fn world(entries: &[(Uuid, f32, f32)]) -> HashMap<Uuid, Player> {
        entries
            .iter()
            .map(|&(id, x, y)| (id, Player::spawned(id, x, y)))
            .collect()
    }

    #[test]
    fn quadtree_query_finds_only_points_in_area() {
        let mut tree = QuadTree::new();
        let near = Uuid::new_v4();
        let far = Uuid::new_v4();
        tree.insert(near, 10.0, 10.0);
        tree.insert(far, 900.0, 900.0);

        let hits = tree.query_square(0.0, 0.0, 100.0);
        assert_eq!(hits, vec![near]);
    }

    #[test]
    fn quadtree_splits_under_load_and_stays_correct() {
        let mut tree = QuadTree::new();
        let mut inside = Vec::new();
        for i in 0..50 {
            let id = Uuid::new_v4();
            let x = -400.0 + i as f32 * 16.0;
            tree.insert(id, x, 0.0);
            if x.abs() <= 200.0 {
                inside.push(id);
            }
        }

        let mut hits = tree.query_square(0.0, 0.0, 200.0);
        hits.sort();
        inside.sort();
        assert_eq!(hits, inside);
    }

    #[test]
    fn refresh_separates_far_players_and_joins_near_ones() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let mut interest = InterestManager::new();

        let far = world(&[(a, -750.0, 0.0), (b, 750.0, 0.0)]);
        interest.refresh(&far);
        assert!(!interest.visible_players(a).contains(&b));
        assert!(!interest.visible_players(b).contains(&a));

        let near = world(&[(a, -200.0, 0.0), (b, 200.0, 0.0)]);
        interest.refresh(&near);
        assert!(interest.visible_players(a).contains(&b));
        assert!(interest.visible_players(b).contains(&a));
    }

    #[test]
    fn bullet_grant_respects_range_and_forget_clears() {
        let shooter = Uuid::new_v4();
        let witness = Uuid::new_v4();
        let distant = Uuid::new_v4();
        let players = world(&[
            (shooter, 0.0, 0.0),
            (witness, 300.0, 0.0),
            (distant, 1500.0, 0.0),
        ]);

        let mut interest = InterestManager::new();
        let bullet = Uuid::new_v4();
        interest.grant_bullet(bullet, 35.0, 0.0, &players);

        assert!(interest.granted_bullets(shooter).contains(&bullet));
        assert!(interest.granted_bullets(witness).contains(&bullet));
        assert!(!interest.granted_bullets(distant).contains(&bullet));

        interest.forget_bullet(bullet);
        assert!(interest.granted_bullets(shooter).is_empty());
    }
}
