//! Arena physics world - rapier2d bodies for players, bullets and walls

use nalgebra::vector;
use rapier2d::prelude::*;
use std::collections::HashMap;
use uuid::Uuid;

use crate::constants::{
    BULLET_RADIUS, MAP_SIZE, PLAYER_DAMPING, PLAYER_RADIUS, TICK_DT,
};

/// The physics world backing one room (or one client-side mirror).
///
/// Players are dynamic disks with locked rotations and heavy linear damping;
/// bullets are CCD-enabled sensor disks so they cannot tunnel through a
/// player in the 20-unit gap between two ticks, but also never push anything.
/// Hit resolution itself happens in the room's bullet scan, not through
/// contact events.
pub struct ArenaPhysics {
    rigid_body_set: RigidBodySet,
    collider_set: ColliderSet,
    integration_parameters: IntegrationParameters,
    physics_pipeline: PhysicsPipeline,
    island_manager: IslandManager,
    broad_phase: DefaultBroadPhase,
    narrow_phase: NarrowPhase,
    impulse_joint_set: ImpulseJointSet,
    multibody_joint_set: MultibodyJointSet,
    ccd_solver: CCDSolver,

    player_bodies: HashMap<Uuid, RigidBodyHandle>,
    bullet_bodies: HashMap<Uuid, RigidBodyHandle>,
}

impl ArenaPhysics {
    pub fn new() -> Self {
        let mut integration_parameters = IntegrationParameters::default();
        integration_parameters.dt = TICK_DT;

        let mut physics = Self {
            rigid_body_set: RigidBodySet::new(),
            collider_set: ColliderSet::new(),
            integration_parameters,
            physics_pipeline: PhysicsPipeline::new(),
            island_manager: IslandManager::new(),
            broad_phase: DefaultBroadPhase::new(),
            narrow_phase: NarrowPhase::new(),
            impulse_joint_set: ImpulseJointSet::new(),
            multibody_joint_set: MultibodyJointSet::new(),
            ccd_solver: CCDSolver::new(),
            player_bodies: HashMap::new(),
            bullet_bodies: HashMap::new(),
        };

        physics.create_walls();
        physics
    }

    fn create_walls(&mut self) {
        let half_size = MAP_SIZE / 2.0;
        let wall_thickness = 10.0;

        let walls = [
            (
                vector![0.0, half_size + wall_thickness / 2.0],
                half_size + wall_thickness,
                wall_thickness / 2.0,
            ),
            (
                vector![0.0, -half_size - wall_thickness / 2.0],
                half_size + wall_thickness,
                wall_thickness / 2.0,
            ),
            (
                vector![half_size + wall_thickness / 2.0, 0.0],
                wall_thickness / 2.0,
                half_size + wall_thickness,
            ),
            (
                vector![-half_size - wall_thickness / 2.0, 0.0],
                wall_thickness / 2.0,
                half_size + wall_thickness,
            ),
        ];

        for (position, half_width, half_height) in walls {
            let wall = RigidBodyBuilder::fixed().translation(position).build();
            let wall_handle = self.rigid_body_set.insert(wall);

            let collider = ColliderBuilder::cuboid(half_width, half_height)
                .restitution(0.0)
                .friction(0.0)
                .build();
            self.collider_set
                .insert_with_parent(collider, wall_handle, &mut self.rigid_body_set);
        }
    }

    pub fn add_player(&mut self, id: Uuid, x: f32, y: f32) {
        let body = RigidBodyBuilder::dynamic()
            .translation(vector![x, y])
            .linear_damping(PLAYER_DAMPING)
            .lock_rotations()
            .build();
        let handle = self.rigid_body_set.insert(body);

        let collider = ColliderBuilder::ball(PLAYER_RADIUS)
            .restitution(0.0)
            .friction(0.0)
            .build();
        self.collider_set
            .insert_with_parent(collider, handle, &mut self.rigid_body_set);

        self.player_bodies.insert(id, handle);
    }

    pub fn remove_player(&mut self, id: Uuid) {
        if let Some(handle) = self.player_bodies.remove(&id) {
            self.rigid_body_set.remove(
                handle,
                &mut self.island_manager,
                &mut self.collider_set,
                &mut self.impulse_joint_set,
                &mut self.multibody_joint_set,
                true,
            );
        }
    }

    /// Set a player's linear velocity for this tick (input application)
    pub fn set_player_velocity(&mut self, id: Uuid, vx: f32, vy: f32) {
        if let Some(&handle) = self.player_bodies.get(&id) {
            if let Some(body) = self.rigid_body_set.get_mut(handle) {
                body.set_linvel(vector![vx, vy], true);
            }
        }
    }

    /// Current translation and linear velocity of a player body
    pub fn player_state(&self, id: Uuid) -> Option<(f32, f32, f32, f32)> {
        self.player_bodies.get(&id).and_then(|&handle| {
            self.rigid_body_set.get(handle).map(|body| {
                let pos = body.translation();
                let vel = body.linvel();
                (pos.x, pos.y, vel.x, vel.y)
            })
        })
    }

    /// Teleport a player body and zero its velocity (respawn)
    pub fn teleport_player(&mut self, id: Uuid, x: f32, y: f32) {
        if let Some(&handle) = self.player_bodies.get(&id) {
            if let Some(body) = self.rigid_body_set.get_mut(handle) {
                body.set_translation(vector![x, y], true);
                body.set_linvel(vector![0.0, 0.0], true);
                body.wake_up(true);
            }
        }
    }

    pub fn add_bullet(&mut self, id: Uuid, x: f32, y: f32, angle: f32, speed: f32) {
        let body = RigidBodyBuilder::dynamic()
            .translation(vector![x, y])
            .linvel(vector![angle.cos() * speed, angle.sin() * speed])
            .ccd_enabled(true)
            .build();
        let handle = self.rigid_body_set.insert(body);

        let collider = ColliderBuilder::ball(BULLET_RADIUS).sensor(true).build();
        self.collider_set
            .insert_with_parent(collider, handle, &mut self.rigid_body_set);

        self.bullet_bodies.insert(id, handle);
    }

    pub fn remove_bullet(&mut self, id: Uuid) {
        if let Some(handle) = self.bullet_bodies.remove(&id) {
            self.rigid_body_set.remove(
                handle,
                &mut self.island_manager,
                &mut self.collider_set,
                &mut self.impulse_joint_set,
                &mut self.multibody_joint_set,
                true,
            );
        }
    }

    pub fn bullet_position(&self, id: Uuid) -> Option<(f32, f32)> {
        self.bullet_bodies.get(&id).and_then(|&handle| {
            self.rigid_body_set.get(handle).map(|body| {
                let pos = body.translation();
                (pos.x, pos.y)
            })
        })
    }

    /// Ids of bullets that still have a live physics body, in no particular
    /// order
    pub fn live_bullets(&self) -> Vec<Uuid> {
        self.bullet_bodies.keys().copied().collect()
    }

    pub fn step(&mut self) {
        self.physics_pipeline.step(
            &vector![0.0, 0.0],
            &self.integration_parameters,
            &mut self.island_manager,
            &mut self.broad_phase,
            &mut self.narrow_phase,
            &mut self.rigid_body_set,
            &mut self.collider_set,
            &mut self.impulse_joint_set,
            &mut self.multibody_joint_set,
            &mut self.ccd_solver,
            None,
            &(),
            &(),
        );
    }

    /// True when any player body has left the representable range - the
    /// unrecoverable-fault signal that poisons the room.
    pub fn any_player_non_finite(&self) -> bool {
        self.player_bodies.values().any(|&handle| {
            self.rigid_body_set
                .get(handle)
                .map(|body| {
                    let pos = body.translation();
                    !(pos.x.is_finite() && pos.y.is_finite())
                })
                .unwrap_or(false)
        })
    }
}

impl Default for ArenaPhysics {
    fn default() -> Self {
        Self::new()
    }
}
